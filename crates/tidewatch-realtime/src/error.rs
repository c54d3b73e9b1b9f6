//! Realtime transport errors.
//!
//! These stay inside the transport task. Callers of [`crate::EventClient`]
//! only ever observe them as `connection_error` / `connection_status` events.

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors raised while establishing or running a transport session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Network or HTTP/WebSocket level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer sent something we could not decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection was closed before or during the session.
    #[error("connection closed: {0}")]
    Closed(String),
}

impl RealtimeError {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}
