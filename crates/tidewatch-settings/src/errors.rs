//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading `tidewatch.json` or interpreting its values.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
    /// The merged settings do not fit the settings schema.
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// A realtime transport name other than `websocket` or `polling`.
    #[error("unknown realtime transport '{0}'")]
    UnknownTransport(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/tidewatch.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "cannot read /etc/tidewatch.json: denied");
    }

    #[test]
    fn parse_error_names_the_file() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("tidewatch.json"),
            source,
        };
        assert!(err.to_string().starts_with("tidewatch.json is not valid JSON"));
    }

    #[test]
    fn unknown_transport_display() {
        let err = SettingsError::UnknownTransport("carrier-pigeon".into());
        assert_eq!(
            err.to_string(),
            "unknown realtime transport 'carrier-pigeon'"
        );
    }
}
