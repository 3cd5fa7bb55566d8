//! Domain types for EventBridge
//!
//! Sessions, envelopes and identifiers. Nothing here does I/O; the registry
//! actor owns every live `Session`.

mod envelope;
mod id;
mod session;

pub use envelope::{
    Direction, Envelope, EnvelopeKind, HEARTBEAT_EVENT, HOST_SOURCE, RECONNECT_EVENT, SURFACE_SOURCE,
};
pub use id::{generate_id, id_kind};
pub use session::{Session, SessionInfo, SessionOptions, SessionStatus, SurfaceParams, SurfaceRef, SyncedValue};
