//! Owner-filtered listener registry
//!
//! Listeners are registered under an owner. Events are only delivered to the
//! listeners of the owner they were raised for, so components that are not
//! driving the link do not react to another component's traffic.

use gcodelink_core::{EventKind, LinkEvent, LinkListener, OwnerId, SubscriptionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

struct Subscription {
    kind: EventKind,
    listener: Arc<dyn LinkListener>,
}

/// Registry of listeners keyed by owner
#[derive(Default)]
pub struct Notifier {
    owners: RwLock<HashMap<OwnerId, HashMap<SubscriptionId, Subscription>>>,
}

impl Notifier {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one kind of event
    pub fn subscribe(
        &self,
        owner: OwnerId,
        kind: EventKind,
        listener: Arc<dyn LinkListener>,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.owners
            .write()
            .entry(owner)
            .or_default()
            .insert(id, Subscription { kind, listener });
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut owners = self.owners.write();
        let mut removed = false;
        owners.retain(|_, subs| {
            removed |= subs.remove(&id).is_some();
            !subs.is_empty()
        });
        removed
    }

    /// Deliver an event to the owner's listeners of the matching kind
    ///
    /// Listeners are called after the registry lock is released, so they may
    /// subscribe or unsubscribe from inside the callback.
    pub fn notify(&self, owner: &OwnerId, event: &LinkEvent) {
        let kind = event.kind();
        let listeners: Vec<Arc<dyn LinkListener>> = match self.owners.read().get(owner) {
            Some(subs) => subs
                .values()
                .filter(|s| s.kind == kind)
                .map(|s| s.listener.clone())
                .collect(),
            None => return,
        };

        for listener in listeners {
            listener.notify(event);
        }
    }

    /// Number of listeners registered for an owner
    pub fn listener_count(&self, owner: &OwnerId) -> usize {
        self.owners.read().get(owner).map_or(0, HashMap::len)
    }
}
