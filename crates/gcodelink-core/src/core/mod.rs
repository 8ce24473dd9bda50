//! Listener and logging interfaces shared by the link and its collaborators

pub mod listener;
pub mod response_log;

pub use listener::{EventKind, LinkEvent, LinkListener, OwnerId, SubscriptionId};
pub use response_log::{LogEntry, LogLevel, MemoryResponseLog, ResponseLog};
