//! Communication layer
//!
//! Everything between the controller's byte stream and the link manager:
//! the transport boundary, the frame demultiplexer, the flow-controlled
//! command queue, and pause tracking.

pub mod channel;
pub mod demux;
pub mod flow_control;
pub mod pause;
pub mod serial;
pub mod transport;

use serde::{Deserialize, Serialize};

pub use channel::{ChannelConnector, ChannelController};
pub use demux::{Frame, FrameDemux};
pub use flow_control::{AckOutcome, BatchId, CommandBatch, FlowController, LineWriter, Pump};
pub use pause::{ControllerHold, PauseTracker};
pub use transport::{Connector, TransportReader, TransportWriter};

/// Serial parity setting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Parameters used to open a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Port name (e.g. "/dev/ttyUSB0", "COM3")
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
    /// Read timeout for a single blocking read, in milliseconds
    pub read_timeout_ms: u64,
}

impl ConnectionParams {
    /// Parameters for a serial port at the given baud rate, 8N1
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            read_timeout_ms: 10,
        }
    }
}
