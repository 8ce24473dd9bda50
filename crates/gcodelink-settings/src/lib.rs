//! GCodeLink Settings Crate
//!
//! Loads, validates, and saves the connection and link settings used by the
//! `gcodelink` binary. Settings are stored as TOML or JSON in the platform
//! config directory.

pub mod config;
pub mod error;

pub use config::{default_config_path, Config, ConnectionSettings, LinkSettings, AUTO_PORT};
pub use error::{ConfigError, SettingsError, SettingsResult};
