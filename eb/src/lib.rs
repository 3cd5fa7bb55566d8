//! EventBridge - session-scoped event bridge
//!
//! A host controller talks to embedded legacy UI surfaces through sessions.
//! Each session owns its subscribers, a bounded replay queue and a status in
//! a small recovery state machine.
//!
//! # Core Concepts
//!
//! - **Single owner**: the session map lives in one registry actor; callers
//!   get snapshots
//! - **Opaque transport**: delivery, liveness, injection and recreation come
//!   from a [`transport::TransportAdapter`]
//! - **Bounded recovery**: failures are classified and retried with linear
//!   backoff up to a fixed budget
//!
//! # Modules
//!
//! - [`bridge`] - Host-facing façade
//! - [`registry`] - Session registry actor
//! - [`dispatch`] - Envelope delivery and failure classification
//! - [`interceptor`] - Per-event interceptor chain
//! - [`heartbeat`] - Liveness probing
//! - [`recovery`] - Recovery coordinator and strategies
//! - [`events`] - Observer bus and event log
//! - [`ipc`] - Unix socket server and client
//! - [`config`] - Configuration types and loading

pub mod bridge;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod interceptor;
pub mod ipc;
pub mod persistence;
pub mod recovery;
pub mod registry;
pub mod sim;
pub mod transport;

// Re-export commonly used types
pub use bridge::{Bridge, BridgeBuilder, BridgeStats};
pub use config::Config;
pub use dispatch::{Dispatcher, FailureReport, SendOptions, SendOutcome};
pub use domain::{Envelope, EnvelopeKind, SessionInfo, SessionOptions, SessionStatus, SurfaceParams, SurfaceRef};
pub use error::{BridgeError, BridgeResult, FailureKind, TransportError};
pub use events::{BridgeEvent, EventBus};
pub use interceptor::{Interceptor, InterceptorId, Verdict, interceptor_fn};
pub use recovery::{RecoveryCoordinator, RecoveryOutcome, RecoveryStrategy};
pub use transport::{LoopbackTransport, TransportAdapter};
