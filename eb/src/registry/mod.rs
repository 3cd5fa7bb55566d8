//! Session registry
//!
//! An actor task owns the session map. Every mutation arrives as a
//! [`RegistryRequest`] and is applied in order, so no two components ever
//! hold a reference to the same session.

mod core;
mod handle;
mod messages;

pub use core::{DEFAULT_CHANNEL_BUFFER, SessionRegistry};
pub use handle::RegistryHandle;
pub use messages::{AttemptEnd, AttemptStart, RecoveryGate, RegistryMetrics, RegistryRequest};
