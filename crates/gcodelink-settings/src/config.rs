//! Configuration file handling for GCodeLink
//!
//! Configuration is organized into two sections:
//! - Connection settings (port, serial framing, timeouts)
//! - Link settings (poll cadence, handshake, pause commands)
//!
//! Files are JSON or TOML, chosen by extension. Missing keys fall back to
//! their defaults, so a file only needs the values it changes.

use crate::error::{ConfigError, SettingsError, SettingsResult};
use gcodelink_communication::{ConnectionParams, LinkConfig, SerialParity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port name that selects the first candidate port found at startup
pub const AUTO_PORT: &str = "Auto";

const CONFIG_DIR_NAME: &str = "gcodelink";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port name, or [`AUTO_PORT`]
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1-2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Time allowed for opening the port and the handshake, in milliseconds
    pub open_timeout_ms: u64,
    /// Timeout of a single blocking read, in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let params = ConnectionParams::default();
        Self {
            port: AUTO_PORT.to_string(),
            baud_rate: params.baud_rate,
            data_bits: params.data_bits,
            stop_bits: params.stop_bits,
            parity: params.parity,
            flow_control: params.flow_control,
            open_timeout_ms: 5000,
            read_timeout_ms: params.read_timeout_ms,
        }
    }
}

impl ConnectionSettings {
    /// Check if the port should be picked automatically
    pub fn is_auto_port(&self) -> bool {
        self.port.trim().is_empty() || self.port.eq_ignore_ascii_case(AUTO_PORT)
    }

    /// Open timeout as a duration
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Transport parameters for `port`
    pub fn to_params(&self, port: impl Into<String>) -> ConnectionParams {
        ConnectionParams {
            port: port.into(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            flow_control: self.flow_control,
            read_timeout_ms: self.read_timeout_ms,
        }
    }
}

/// Link tuning as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Interval between status polls
    pub status_poll_interval_ms: u64,
    /// Number of waits for the first status packet
    pub handshake_attempts: u32,
    /// Length of each handshake wait
    pub handshake_interval_ms: u64,
    /// Number of waits for a queried reply
    pub query_attempts: u32,
    /// Length of each query wait
    pub query_interval_ms: u64,
    /// How long to wait for the answer to a line of a replaced batch
    pub orphan_ack_timeout_ms: u64,
    /// Command words that make the controller hold
    pub pause_commands: Vec<String>,
    /// Character starting a same-line comment
    pub comment_marker: char,
    /// Request a status packet after every acknowledged line
    pub status_after_ack: bool,
    /// Number of entries kept by the response log
    pub response_log_capacity: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        let link = LinkConfig::default();
        Self {
            status_poll_interval_ms: millis(link.status_poll_interval),
            handshake_attempts: link.handshake_attempts,
            handshake_interval_ms: millis(link.handshake_interval),
            query_attempts: link.query_attempts,
            query_interval_ms: millis(link.query_interval),
            orphan_ack_timeout_ms: millis(link.orphan_ack_timeout),
            pause_commands: link.pause_commands,
            comment_marker: link.comment_marker,
            status_after_ack: link.status_after_ack,
            response_log_capacity: 500,
        }
    }
}

impl LinkSettings {
    /// Runtime link configuration
    pub fn to_link_config(&self) -> LinkConfig {
        LinkConfig {
            status_poll_interval: Duration::from_millis(self.status_poll_interval_ms),
            handshake_attempts: self.handshake_attempts,
            handshake_interval: Duration::from_millis(self.handshake_interval_ms),
            query_attempts: self.query_attempts,
            query_interval: Duration::from_millis(self.query_interval_ms),
            orphan_ack_timeout: Duration::from_millis(self.orphan_ack_timeout_ms),
            pause_commands: self.pause_commands.clone(),
            comment_marker: self.comment_marker,
            status_after_ack: self.status_after_ack,
            ..LinkConfig::default()
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// File format, picked by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )
            .into()),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Link settings
    pub link: LinkSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Load config from `path`, or the defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!("No settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SettingsError::ConfigDirectory(format!("{}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, content).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        let conn = &self.connection;
        if conn.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }
        if !(5..=8).contains(&conn.data_bits) {
            return Err(out_of_range("connection.data_bits", conn.data_bits));
        }
        if !(1..=2).contains(&conn.stop_bits) {
            return Err(out_of_range("connection.stop_bits", conn.stop_bits));
        }
        if conn.open_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.open_timeout_ms",
                "must be > 0",
            ));
        }

        let link = &self.link;
        for (key, value) in [
            ("link.status_poll_interval_ms", link.status_poll_interval_ms),
            ("link.handshake_interval_ms", link.handshake_interval_ms),
            ("link.query_interval_ms", link.query_interval_ms),
            ("link.orphan_ack_timeout_ms", link.orphan_ack_timeout_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::invalid(key, "must be > 0"));
            }
        }
        if link.handshake_attempts == 0 {
            return Err(SettingsError::invalid("link.handshake_attempts", "must be > 0"));
        }
        if link.query_attempts == 0 {
            return Err(SettingsError::invalid("link.query_attempts", "must be > 0"));
        }
        if link.comment_marker.is_ascii_alphanumeric() || link.comment_marker.is_whitespace() {
            return Err(SettingsError::invalid(
                "link.comment_marker",
                "must be a punctuation character",
            ));
        }
        if link.pause_commands.iter().any(|c| c.trim().is_empty()) {
            return Err(SettingsError::invalid(
                "link.pause_commands",
                "entries must not be empty",
            ));
        }
        if link.response_log_capacity == 0 {
            return Err(SettingsError::invalid(
                "link.response_log_capacity",
                "must be > 0",
            ));
        }

        Ok(())
    }
}

fn out_of_range(key: &str, value: impl ToString) -> SettingsError {
    ConfigError::ValueOutOfRange {
        key: key.to_string(),
        value: value.to_string(),
    }
    .into()
}

/// Default config file location in the platform config directory
pub fn default_config_path() -> SettingsResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or_else(|| ConfigError::NoConfigDir(std::env::consts::OS.to_string()).into())
}
