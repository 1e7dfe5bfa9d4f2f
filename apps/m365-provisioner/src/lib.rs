//! Microsoft 365 provisioning service.
//!
//! Loads configuration from the environment, wires the connector and serves
//! the provisioning API.

pub mod app;
pub mod config;
pub mod logging;

pub use app::{build_app, build_cors_layer};
pub use config::{Config, ConfigError};
