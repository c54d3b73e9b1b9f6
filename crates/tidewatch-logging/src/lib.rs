//! # tidewatch-logging
//!
//! Structured logging with `tracing`.
//!
//! Installs a single global subscriber with an `EnvFilter` (`RUST_LOG` wins
//! over the configured level) and either a human-readable or a JSON
//! formatter on stdout.

#![deny(unsafe_code)]

use tidewatch_settings::LoggingSettings;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Returned by [`init_logging`]; records what was installed.
#[derive(Debug, Clone)]
pub struct LoggingGuard {
    /// Filter directive in effect.
    pub filter: String,
    /// Whether JSON formatting is active.
    pub json: bool,
    /// `false` if another subscriber was already installed.
    pub installed: bool,
}

/// Build the env filter: `RUST_LOG` if present and valid, else `level`.
///
/// An unparsable `level` falls back to `info`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global subscriber. Call once at startup.
pub fn init_logging(settings: &LoggingSettings) -> LoggingGuard {
    let filter = build_filter(&settings.level);
    let filter_str = filter.to_string();

    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    let installed = match tracing_subscriber::registry().with(fmt_layer).try_init() {
        Ok(()) => true,
        Err(e) => {
            eprintln!("tidewatch-logging: subscriber already installed: {e}");
            false
        }
    };

    LoggingGuard {
        filter: filter_str,
        json: settings.json,
        installed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_uses_level_without_rust_log() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert_eq!(build_filter("debug").to_string(), "debug");
    }

    #[test]
    fn garbage_level_falls_back_to_info() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert_eq!(build_filter("tidewatch=loudest").to_string(), "info");
    }

    #[test]
    fn second_init_is_harmless() {
        let settings = LoggingSettings::default();
        let _first = init_logging(&settings);
        let second = init_logging(&settings);
        assert!(!second.installed);
        assert!(!second.json);
    }
}
