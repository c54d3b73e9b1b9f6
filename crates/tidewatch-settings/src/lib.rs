//! # tidewatch-settings
//!
//! Layered configuration for the Tidewatch bootstrap server and realtime client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TidewatchSettings::default()`]
//! 2. **Settings file**: `./tidewatch.json` or `$TIDEWATCH_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables**: `PORT`, `TIDEWATCH_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use tidewatch_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("listening on port {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    parse_bool, parse_u16_range, parse_u64_range, settings_path,
};
pub use types::*;
