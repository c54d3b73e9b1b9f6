//! Settings types for the bootstrap server, backend API, realtime feed and logging.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TidewatchSettings {
    /// Bootstrap server settings.
    pub server: ServerSettings,
    /// Backend REST API the single-page app talks to.
    pub api: ApiSettings,
    /// Realtime hazard feed settings.
    pub realtime: RealtimeSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Bootstrap server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Application root; the build command runs here.
    pub app_dir: String,
    /// Compiled bundle directory, relative to `app_dir` unless absolute.
    pub bundle_dir: String,
    /// Entry document inside the bundle directory (also the readiness marker).
    pub entry_document: String,
    /// Shell command that produces the bundle. `None` disables the build step.
    pub build_command: Option<String>,
    /// Reload delay embedded in the placeholder page, in milliseconds.
    pub reload_delay_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            app_dir: ".".to_string(),
            bundle_dir: "build".to_string(),
            entry_document: "index.html".to_string(),
            build_command: Some("npm run build".to_string()),
            reload_delay_ms: 5_000,
        }
    }
}

/// Backend REST API settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL of the hazard report API.
    pub base_url: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
        }
    }
}

/// Realtime transport flavours, in negotiation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent WebSocket stream.
    Websocket,
    /// HTTP long-polling.
    Polling,
}

impl TransportKind {
    /// Engine.IO query-string name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Websocket => "websocket",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::Websocket),
            "polling" => Ok(Self::Polling),
            other => Err(SettingsError::UnknownTransport(other.to_owned())),
        }
    }
}

/// Realtime hazard feed settings.
///
/// The reconnection defaults mirror the stock Socket.IO client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Realtime endpoint (`http(s)://` origin of the Socket.IO server).
    pub url: String,
    /// Transport negotiation order.
    pub transports: Vec<String>,
    /// Whether the transport reconnects on its own.
    pub reconnection: bool,
    /// Maximum reconnection attempts. `None` retries forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnection_attempts: Option<u32>,
    /// Initial reconnection delay in milliseconds.
    pub reconnection_delay_ms: u64,
    /// Upper bound for the reconnection delay in milliseconds.
    pub reconnection_delay_max_ms: u64,
    /// Jitter applied to each reconnection delay (0.0 – 1.0).
    pub randomization_factor: f64,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: "https://sih-web-server.onrender.com".to_string(),
            transports: vec!["websocket".to_string(), "polling".to_string()],
            reconnection: true,
            reconnection_attempts: None,
            reconnection_delay_ms: 1_000,
            reconnection_delay_max_ms: 5_000,
            randomization_factor: 0.5,
            connect_timeout_ms: 20_000,
        }
    }
}

impl RealtimeSettings {
    /// Parse `transports` into a negotiation order.
    ///
    /// Unknown names are skipped; an empty result falls back to
    /// websocket-then-polling.
    pub fn transport_order(&self) -> Vec<TransportKind> {
        let mut order = Vec::new();
        for name in &self.transports {
            match name.parse::<TransportKind>() {
                Ok(kind) if !order.contains(&kind) => order.push(kind),
                Ok(_) => {}
                Err(e) => tracing::warn!(transport = %name, error = %e, "ignoring transport"),
            }
        }
        if order.is_empty() {
            order = vec![TransportKind::Websocket, TransportKind::Polling];
        }
        order
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level directive. `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
