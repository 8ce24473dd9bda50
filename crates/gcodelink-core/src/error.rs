//! Error handling for GCodeLink
//!
//! Errors are split by the layer that raises them:
//! - Connection errors (transport open/close, silent devices, failed writes)
//! - Controller errors (protocol `error:` replies, query timeouts)
//!
//! Both fold into [`Error`], which every public API returns.

use thiserror::Error;

/// Connection error type
///
/// Represents failures of the byte stream between the host and the controller.
/// Any of these, except [`ConnectionError::WriteFailed`], ends in a port-close cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The transport could not be opened
    #[error("Cannot open {port}: {reason}")]
    FailedToOpen { port: String, reason: String },

    /// Port opened but the controller never answered a status request
    #[error("Device not responding after {attempts} status requests")]
    NotResponding {
        /// Number of polls made before giving up.
        attempts: u32,
    },

    /// The read side ended or failed
    #[error("Link lost: {reason}")]
    ConnectionLost { reason: String },

    /// The sink refused a write
    #[error("Write failed: {reason}")]
    WriteFailed { reason: String },

    /// No connection is open
    #[error("Not connected")]
    NotConnected,

    /// A connection is already open or being opened
    #[error("Already connected")]
    AlreadyConnected,

    /// Port enumeration or configuration failed in the serial driver
    #[error("Serial driver: {reason}")]
    SerialError { reason: String },

    /// Parameters the transport cannot apply (data bits, stop bits)
    #[error("Unusable connection settings: {reason}")]
    InvalidParameters { reason: String },
}

/// Controller error type
///
/// Represents failures reported by, or waiting on, the controller itself.
/// These abort the current batch only; the connection stays usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// The controller answered a line with `error:`
    #[error("Command rejected: {line}: {response}")]
    CommandRejected {
        /// The line that was rejected, as written.
        line: String,
        /// The full accumulated response, including the `error:` line.
        response: String,
    },

    /// A bounded wait for a reply expired
    #[error("No reply within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The batch was stopped or replaced before it finished
    #[error("Batch {batch} was cancelled")]
    Cancelled {
        /// Identifier of the cancelled batch.
        batch: u64,
    },
}

/// Any GCodeLink failure
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a free-form message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if a bounded wait expired
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::Timeout { .. }))
    }

    /// Check if the transport is at fault
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if the controller rejected a line
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::Controller(ControllerError::CommandRejected { .. })
        )
    }
}

/// Result alias over [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::FailedToOpen {
            port: "/dev/ttyACM0".to_string(),
            reason: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot open /dev/ttyACM0: permission denied"
        );

        let err = ConnectionError::NotResponding { attempts: 10 };
        assert_eq!(
            err.to_string(),
            "Device not responding after 10 status requests"
        );
    }

    #[test]
    fn test_error_classification() {
        let err: Error = ControllerError::Timeout { timeout_ms: 2000 }.into();
        assert!(err.is_timeout());
        assert!(!err.is_connection_error());

        let err: Error = ConnectionError::NotConnected.into();
        assert!(err.is_connection_error());

        let err: Error = ControllerError::CommandRejected {
            line: "G1 X".to_string(),
            response: "error:2".to_string(),
        }
        .into();
        assert!(err.is_protocol_error());
        assert_eq!(err.to_string(), "Command rejected: G1 X: error:2");
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
