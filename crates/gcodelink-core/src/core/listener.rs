//! Link listener interface
//!
//! Listeners are registered per owner. Only listeners of the owner that
//! currently holds the link receive events.

use crate::data::StatusSnapshot;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a logical caller of the link
///
/// The last owner to connect, start, stop, or send wins the link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    /// Create an owner token from a name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Owner name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription handle for unsubscribing from link events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Kind of event a subscription receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Status snapshots
    StatusChanged,
    /// Lines as they are written to the controller
    CurrentLineChanged,
}

/// Event delivered to link listeners
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The live state changed; carries the snapshot taken right after the change
    StatusChanged(StatusSnapshot),
    /// A line was written to the controller
    CurrentLineChanged(String),
}

impl LinkEvent {
    /// Kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            LinkEvent::StatusChanged(_) => EventKind::StatusChanged,
            LinkEvent::CurrentLineChanged(_) => EventKind::CurrentLineChanged,
        }
    }
}

/// Listener trait for link events
///
/// Called synchronously on the task that produced the event, after internal
/// locks are released. Implementations should return quickly.
pub trait LinkListener: Send + Sync {
    /// Called for every event the subscription matches
    fn notify(&self, event: &LinkEvent);
}

impl<F> LinkListener for F
where
    F: Fn(&LinkEvent) + Send + Sync,
{
    fn notify(&self, event: &LinkEvent) {
        self(event)
    }
}
