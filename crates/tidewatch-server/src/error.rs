//! Server error types.

use thiserror::Error;

/// Errors surfaced by the bootstrap server.
///
/// Only startup failures reach the caller. Build failures after startup are
/// reported through logs and [`crate::BuildStatus::Failed`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Any other I/O failure during startup.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The build command could not be started at all.
    #[error("failed to spawn build command `{command}`: {source}")]
    BuildSpawn {
        /// The shell command line.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
