//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tidewatch_settings::ServerSettings;

/// A shell command that produces the bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildCommand {
    /// Command line, run through `sh -c`.
    pub command: String,
    /// Working directory for the command.
    pub working_dir: PathBuf,
}

/// Resolved configuration for [`crate::BootstrapServer`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Directory holding the compiled bundle.
    pub bundle_dir: PathBuf,
    /// Entry document file name inside `bundle_dir`.
    pub entry_document: String,
    /// Build step, if any.
    pub build: Option<BuildCommand>,
    /// Delay before the placeholder page reloads itself.
    pub reload_delay: Duration,
}

impl ServerConfig {
    /// `host:port` string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Path of the entry document, which doubles as the readiness marker.
    pub fn entry_path(&self) -> PathBuf {
        self.bundle_dir.join(&self.entry_document)
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        let app_dir = PathBuf::from(&s.app_dir);
        let bundle_dir = resolve(&app_dir, &s.bundle_dir);
        let build = s
            .build_command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|command| BuildCommand {
                command: command.to_string(),
                working_dir: app_dir.clone(),
            });

        Self {
            host: s.host.clone(),
            port: s.port,
            bundle_dir,
            entry_document: s.entry_document.clone(),
            build,
            reload_delay: Duration::from_millis(s.reload_delay_ms),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
