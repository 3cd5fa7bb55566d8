//! Observer events
//!
//! Every notable bridge action emits a [`BridgeEvent`] on the [`EventBus`].
//! Hosts register named observers with `on`/`off`; background consumers
//! such as the [`EventLogger`] read the broadcast stream.
//!
//! ```rust,ignore
//! let bus = Arc::new(EventBus::with_default_capacity());
//! let id = bus.on("session-created", |event| println!("{}", event.name()));
//! let mut rx = bus.subscribe();
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, Observer, ObserverId};
pub use logger::{EventLogger, read_session_events, spawn_event_logger};
pub use types::{BridgeEvent, EventLogEntry};
