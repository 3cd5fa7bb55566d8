//! Session registry messages
//!
//! Requests and replies for the registry actor.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::domain::{Envelope, SessionInfo, SessionOptions, SurfaceRef, SyncedValue};
use crate::error::BridgeResult;

/// Result of asking to start recovery for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryGate {
    /// Session moved `active -> failed`; caller owns the recovery
    Proceed,
    /// Another recovery already owns this session
    AlreadyRecovering,
    /// Activity was recorded after the failure was observed
    Stale,
    /// Session is permanently failed
    Terminal,
    Missing,
}

/// Result of starting one recovery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStart {
    /// Session moved `failed -> reconnecting`; this is attempt k
    Started(u32),
    /// Retries are used up; session is now permanently failed
    Exhausted,
    Missing,
}

/// Result of finishing one recovery attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptEnd {
    /// Session is active again; these envelopes still need flushing
    Recovered { pending: Vec<Envelope> },
    /// Attempt k failed and another is allowed
    Retry(u32),
    PermanentlyFailed,
    Missing,
}

/// Aggregated registry metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryMetrics {
    pub sessions: usize,
    pub active: usize,
    pub reconnecting: usize,
    pub failed: usize,
    pub permanently_failed: usize,
    pub total_subscribers: usize,
    pub queued_events: usize,
    pub recovery_attempts: u64,
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
    pub requests_processed: u64,
}

/// Requests sent to the registry actor
#[derive(Debug)]
pub enum RegistryRequest {
    Create {
        options: SessionOptions,
        reply: oneshot::Sender<BridgeResult<SessionInfo>>,
    },
    Destroy {
        id: String,
        reason: String,
        reply: oneshot::Sender<bool>,
    },
    /// Destroy only if the session is still idle past its timeout
    DestroyIfIdle {
        id: String,
        reason: String,
        reply: oneshot::Sender<bool>,
    },
    DestroyAll {
        reason: String,
        reply: oneshot::Sender<usize>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<Option<SessionInfo>>,
    },
    List {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    SetDefaultSurface {
        target: Option<SurfaceRef>,
    },

    /// Target for a send; `require_active` rejects non-active sessions
    ResolveTarget {
        id: String,
        require_active: bool,
        reply: oneshot::Sender<BridgeResult<SurfaceRef>>,
    },
    /// Liveness signal; `delivered` also counts a sent event
    RecordActivity {
        id: String,
        delivered: bool,
        reply: oneshot::Sender<bool>,
    },

    Subscribe {
        id: String,
        event_name: String,
        subscriber_id: String,
        reply: oneshot::Sender<BridgeResult<bool>>,
    },
    Unsubscribe {
        id: String,
        event_name: String,
        subscriber_id: String,
        reply: oneshot::Sender<BridgeResult<bool>>,
    },
    /// Inbound event: refresh liveness and notify subscribers
    Inbound {
        envelope: Envelope,
        reply: oneshot::Sender<BridgeResult<usize>>,
    },

    PushPending {
        id: String,
        envelope: Envelope,
        reply: oneshot::Sender<BridgeResult<Option<Envelope>>>,
    },
    TakePending {
        id: String,
        reply: oneshot::Sender<BridgeResult<Vec<Envelope>>>,
    },
    RestorePending {
        id: String,
        envelopes: Vec<Envelope>,
        reply: oneshot::Sender<BridgeResult<usize>>,
    },
    StoreData {
        id: String,
        key: String,
        value: SyncedValue,
        reply: oneshot::Sender<BridgeResult<()>>,
    },
    Retarget {
        id: String,
        target: SurfaceRef,
        reply: oneshot::Sender<BridgeResult<()>>,
    },

    BeginRecovery {
        id: String,
        observed_activity: Option<Instant>,
        reply: oneshot::Sender<RecoveryGate>,
    },
    StartAttempt {
        id: String,
        max_retries: u32,
        reply: oneshot::Sender<AttemptStart>,
    },
    FinishAttempt {
        id: String,
        success: bool,
        max_retries: u32,
        reply: oneshot::Sender<AttemptEnd>,
    },
    MarkPermanentlyFailed {
        id: String,
        reason: String,
        reply: oneshot::Sender<bool>,
    },

    Metrics {
        reply: oneshot::Sender<RegistryMetrics>,
    },
    Shutdown,
}

/// Payload of the notification sent to a subscriber when its session goes away
pub(crate) fn destroyed_notice(session_id: &str, reason: &str) -> Value {
    serde_json::json!({ "session_id": session_id, "reason": reason })
}
