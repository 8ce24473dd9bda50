//! Settings errors

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to read, write, or validate a settings file
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Cannot read settings from {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("Cannot write settings to {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    /// A value parsed but is not usable
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("Config directory error: {0}")]
    ConfigDirectory(String),

    #[error("Malformed JSON settings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed TOML settings: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Cannot encode settings as TOML: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SettingsError {
    /// Shorthand for [`SettingsError::InvalidSetting`]
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Problems with the shape or location of a settings file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Extension other than `.toml` or `.json`
    #[error("Unsupported settings format '{0}', expected .toml or .json")]
    UnsupportedFormat(String),

    #[error("Value out of range for '{key}': {value}")]
    ValueOutOfRange { key: String, value: String },

    /// No per-user config directory on this platform
    #[error("No config directory on {0}")]
    NoConfigDir(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;
