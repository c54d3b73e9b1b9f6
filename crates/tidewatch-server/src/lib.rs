//! # tidewatch-server
//!
//! Bootstrap HTTP server for the Tidewatch single-page app.
//!
//! - Binds the listening port before anything else
//! - Serves the compiled bundle (with SPA fallback to the entry document)
//!   once it exists, or a self-reloading placeholder page until then
//! - Runs the bundle build as a one-shot background task when the bundle
//!   is missing at startup
//! - Readiness is re-evaluated on every request

#![deny(unsafe_code)]

pub mod build;
pub mod config;
pub mod error;
pub mod placeholder;
pub mod readiness;
pub mod server;

pub use build::{BuildOutcome, BuildRunner, ShellBuildRunner, spawn_build};
pub use config::{BuildCommand, ServerConfig};
pub use error::ServerError;
pub use readiness::{BuildStatus, Readiness};
pub use server::{AppState, BootstrapServer, ServerHandle, router};
