//! Event Bus - observer registry and broadcast stream for bridge events
//!
//! Two delivery paths share one `emit`:
//! - named observers, called synchronously in registration order
//! - a tokio broadcast channel for background consumers (log sinks, IPC)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

use super::types::BridgeEvent;

/// Default broadcast capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Callback registered for one event name
pub type Observer = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to remove the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Central event bus for bridge activity
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
    observers: RwLock<HashMap<String, Vec<(ObserverId, Observer)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a new event bus with the given broadcast capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Register an observer for `event_name` (e.g. `session-created`)
    pub fn on<F>(&self, event_name: &str, observer: F) -> ObserverId
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(%event_name, ?id, "EventBus::on: registering observer");
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_name.to_string())
            .or_default()
            .push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer; returns false if it was not registered
    pub fn off(&self, id: ObserverId) -> bool {
        debug!(?id, "EventBus::off: called");
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        observers.retain(|_, list| {
            let before = list.len();
            list.retain(|(oid, _)| *oid != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    /// Emit an event to observers, then to stream subscribers
    ///
    /// Observers run on the caller's task and must not block.
    pub fn emit(&self, event: BridgeEvent) {
        debug!(event_name = event.name(), session_id = ?event.session_id(), "EventBus::emit");
        // Snapshot so an observer may call on/off without deadlocking
        let observers: Vec<Observer> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event.name())
            .map(|list| list.iter().map(|(_, o)| o.clone()).collect())
            .unwrap_or_default();

        for observer in observers {
            observer(&event);
        }

        // Ignore send errors (no subscribers is OK)
        let _ = self.tx.send(event);
    }

    /// Subscribe to the broadcast stream of every event
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Number of observers registered for `event_name`
    pub fn observer_count(&self, event_name: &str) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_name)
            .map_or(0, Vec::len)
    }

    /// Number of stream subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
