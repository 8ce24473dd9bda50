//! # GCodeLink Core
//!
//! Core types and traits for GCodeLink.
//! Provides the error taxonomy, the status snapshot model, owner-scoped
//! listener interfaces, and the response log used by the link manager.

pub mod core;
pub mod data;
pub mod error;

pub use self::core::{
    EventKind, LinkEvent, LinkListener, LogEntry, LogLevel, MemoryResponseLog, OwnerId,
    ResponseLog, SubscriptionId,
};

pub use data::{Condition, LinkState, Position, StatusSnapshot, StepperFlags};

pub use error::{ConnectionError, ControllerError, Error, Result};
