//! # GCodeLink
//!
//! A serial link manager for GRBL-class CNC motion controllers:
//! - Frame demultiplexing of interleaved status packets and text responses
//! - A status model with work/machine coordinate derivation
//! - A single-outstanding-line command queue with owner hand-over
//! - Pause/resume tracking for `M0`-class holds and host holds
//!
//! ## Architecture
//!
//! 1. **gcodelink-core** - Errors, status snapshot, listeners, response log
//! 2. **gcodelink-communication** - Transports, framing, flow control, link manager
//! 3. **gcodelink-settings** - Persisted connection and link settings
//! 4. **gcodelink** - This crate: re-exports, logging setup, and the CLI binary

use std::path::Path;

pub use gcodelink_core::{
    Condition, ConnectionError, ControllerError, Error, EventKind, LinkEvent, LinkListener,
    LinkState, LogEntry, LogLevel, MemoryResponseLog, OwnerId, Position, ResponseLog, Result,
    StatusSnapshot, StepperFlags, SubscriptionId,
};

pub use gcodelink_communication::{
    list_ports, BatchId, ChannelConnector, ChannelController, ConnectionParams, Connector,
    LinkConfig, LinkManager, SerialConnector, SerialParity, SerialPortInfo,
};

pub use gcodelink_settings::{default_config_path, Config, ConnectionSettings, LinkSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Honours `RUST_LOG` and defaults to `info`. Output goes to stderr, as
/// formatted text or one JSON object per event.
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true);
        registry.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(true);
        registry.with(fmt_layer).try_init()?;
    }

    Ok(())
}

/// Read a G-code program, one entry per line
///
/// Line endings are normalised; blank lines are kept so progress counts
/// match the file.
pub fn load_program(path: &Path) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_program() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "G21\r\nG0 X1 ; rapid\r\n\r\nM2\n").unwrap();

        let program = load_program(file.path()).unwrap();
        assert_eq!(program, vec!["G21", "G0 X1 ; rapid", "", "M2"]);
    }

    #[test]
    fn test_load_missing_program() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(load_program(&dir.path().join("missing.nc")).is_err());
    }
}
