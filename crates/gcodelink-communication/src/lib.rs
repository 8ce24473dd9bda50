//! # GCodeLink Communication
//!
//! Transport, framing, and flow-controlled streaming for GRBL-class motion
//! controllers.
//!
//! Bytes from a [`Connector`](communication::Connector) are split by the
//! [`FrameDemux`] into status packets and text lines. Status packets update the
//! [`StatusModel`]; text lines drive the [`FlowController`], which writes one
//! line at a time. [`LinkManager`] ties these together behind an async API.

pub mod communication;
pub mod firmware;
pub mod link;

pub use communication::{
    serial::{list_ports, SerialConnector, SerialPortInfo},
    AckOutcome, BatchId, ChannelConnector, ChannelController, CommandBatch, ConnectionParams,
    Connector, ControllerHold, FlowController, Frame, FrameDemux, LineWriter, PauseTracker, Pump,
    SerialParity, TransportReader, TransportWriter,
};
pub use firmware::grbl::{Response, StatusModel};
pub use link::{LinkConfig, LinkManager};
