//! SPIRE Server
//!
//! HTTP surface and process wiring for the SPIRE runtime core.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod server;

pub use api::{AppState, router};
pub use config::{ConfigError, LogFormat, ServerConfig};
pub use server::SpireServer;
