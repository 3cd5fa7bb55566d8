//! Session domain type
//!
//! A session is the logical connection scope between the host controller and
//! one target surface. Status is private and only changes through
//! [`Session::transition`], which enforces the recovery state machine.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use super::envelope::Envelope;
use crate::config::SessionConfig;
use crate::error::{BridgeError, BridgeResult};

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Delivering normally
    Active,
    /// A recovery strategy is running
    Reconnecting,
    /// A failure was classified; waiting for the next attempt
    Failed,
    /// Retries exhausted or user action required
    PermanentlyFailed,
    /// Removed from the registry
    Destroyed,
}

impl SessionStatus {
    /// Check whether the state machine allows `self -> next`
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Active, Failed) => true,
            (Failed, Reconnecting) | (Failed, PermanentlyFailed) => true,
            (Reconnecting, Active) | (Reconnecting, Failed) => true,
            _ => false,
        }
    }

    /// Terminal statuses never leave except by destruction
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::PermanentlyFailed | SessionStatus::Destroyed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
            Self::PermanentlyFailed => write!(f, "permanently_failed"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Opaque handle to a surface (embedded view or separate window)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceRef(String);

impl SurfaceRef {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SurfaceRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SurfaceRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SurfaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters used to recreate a surface that went away
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceParams {
    pub url: String,
    pub features: Option<String>,
}

/// Options accepted by session creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Caller-chosen id; generated when absent
    pub session_id: Option<String>,
    /// Target surface; falls back to the default surface when absent
    pub target: Option<SurfaceRef>,
    pub module: Option<String>,
    pub user_id: Option<String>,
    /// How to recreate the surface if it closes
    pub creation: Option<SurfaceParams>,
    /// Per-session overrides of the configured defaults
    pub config: Option<SessionConfig>,
}

impl SessionOptions {
    pub fn for_target(target: impl Into<SurfaceRef>) -> Self {
        Self {
            target: Some(target.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_creation(mut self, creation: SurfaceParams) -> Self {
        self.creation = Some(creation);
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Last synced value for a data key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedValue {
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    pub synced: bool,
}

/// A logical connection scope between host and one surface
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub target: SurfaceRef,
    pub module: String,
    pub user_id: String,
    pub creation: Option<SurfaceParams>,
    pub created_at: DateTime<Utc>,
    pub last_activity: Instant,
    status: SessionStatus,
    /// event name -> subscriber ids
    pub subscribers: HashMap<String, BTreeSet<String>>,
    pending: VecDeque<Envelope>,
    pub recovery_attempts: u32,
    pub config: SessionConfig,
    pub data: HashMap<String, SyncedValue>,
    pub sent_events: u64,
}

impl Session {
    /// Create an active session bound to `target`
    pub fn new(id: impl Into<String>, target: SurfaceRef, options: SessionOptions, defaults: &SessionConfig) -> Self {
        Self {
            id: id.into(),
            target,
            module: options.module.unwrap_or_else(|| "unknown".to_string()),
            user_id: options.user_id.unwrap_or_else(|| "anonymous".to_string()),
            creation: options.creation,
            created_at: Utc::now(),
            last_activity: Instant::now(),
            status: SessionStatus::Active,
            subscribers: HashMap::new(),
            pending: VecDeque::new(),
            recovery_attempts: 0,
            config: options.config.unwrap_or_else(|| defaults.clone()),
            data: HashMap::new(),
            sent_events: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    pub fn transition(&mut self, next: SessionStatus) -> BridgeResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(BridgeError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record a liveness signal
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Append an undelivered envelope, evicting the oldest at capacity
    ///
    /// Returns the envelope that was dropped, if any. With a capacity of zero
    /// the new envelope itself is dropped.
    pub fn push_pending(&mut self, envelope: Envelope) -> Option<Envelope> {
        let max = self.config.max_queue_size;
        if max == 0 {
            return Some(envelope);
        }
        let evicted = if self.pending.len() >= max {
            self.pending.pop_front()
        } else {
            None
        };
        self.pending.push_back(envelope);
        evicted
    }

    /// Drain the pending queue in FIFO order
    pub fn take_pending(&mut self) -> Vec<Envelope> {
        self.pending.drain(..).collect()
    }

    /// Put envelopes back at the head of the queue, preserving their order
    ///
    /// Anything queued since the drain stays behind them. The bound still
    /// holds afterwards; the oldest entries go first. Returns how many were
    /// dropped.
    pub fn restore_pending(&mut self, envelopes: Vec<Envelope>) -> usize {
        for envelope in envelopes.into_iter().rev() {
            self.pending.push_front(envelope);
        }
        let mut dropped = 0;
        while self.pending.len() > self.config.max_queue_size {
            self.pending.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Envelope> {
        self.pending.iter()
    }

    /// Add a subscriber; returns false if it was already present
    pub fn subscribe(&mut self, event_name: &str, subscriber_id: &str) -> bool {
        self.subscribers
            .entry(event_name.to_string())
            .or_default()
            .insert(subscriber_id.to_string())
    }

    /// Remove a subscriber; returns false if it was not present
    pub fn unsubscribe(&mut self, event_name: &str, subscriber_id: &str) -> bool {
        let Some(set) = self.subscribers.get_mut(event_name) else {
            return false;
        };
        let removed = set.remove(subscriber_id);
        if set.is_empty() {
            self.subscribers.remove(event_name);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.values().map(BTreeSet::len).sum()
    }

    /// Snapshot for callers outside the registry
    pub fn info(&self) -> SessionInfo {
        let idle = self.idle();
        let last_activity_at = chrono::Duration::from_std(idle)
            .map(|d| Utc::now() - d)
            .unwrap_or_else(|_| Utc::now());
        SessionInfo {
            id: self.id.clone(),
            target: self.target.clone(),
            module: self.module.clone(),
            user_id: self.user_id.clone(),
            creation: self.creation.clone(),
            status: self.status,
            created_at: self.created_at,
            last_activity_at,
            idle_ms: idle.as_millis() as u64,
            last_activity: self.last_activity,
            subscribers: self
                .subscribers
                .iter()
                .map(|(event, subs)| (event.clone(), subs.iter().cloned().collect()))
                .collect(),
            pending_count: self.pending.len(),
            recovery_attempts: self.recovery_attempts,
            sent_events: self.sent_events,
            config: self.config.clone(),
            data: self.data.clone(),
        }
    }
}

/// Read-only snapshot of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub target: SurfaceRef,
    pub module: String,
    pub user_id: String,
    /// Parameters for recreating the surface, if it was opened by the bridge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation: Option<SurfaceParams>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub idle_ms: u64,
    /// Monotonic activity marker for comparisons inside the process
    #[serde(skip)]
    pub last_activity: Instant,
    pub subscribers: HashMap<String, Vec<String>>,
    pub pending_count: usize,
    pub recovery_attempts: u32,
    pub sent_events: u64,
    pub config: SessionConfig,
    pub data: HashMap<String, SyncedValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnvelopeKind;

    fn session_with_queue(max: usize) -> Session {
        let config = SessionConfig {
            max_queue_size: max,
            ..Default::default()
        };
        Session::new("s1", SurfaceRef::from("v1"), SessionOptions::default(), &config)
    }

    fn env(name: &str) -> Envelope {
        Envelope::outbound(EnvelopeKind::Event, "s1", name, Value::Null)
    }

    #[test]
    fn test_new_session_defaults() {
        let session = session_with_queue(10);
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.module, "unknown");
        assert_eq!(session.user_id, "anonymous");
        assert_eq!(session.recovery_attempts, 0);
        assert_eq!(session.pending_len(), 0);
    }

    #[test]
    fn test_state_machine() {
        let mut session = session_with_queue(10);
        assert!(session.transition(SessionStatus::Reconnecting).is_err());
        session.transition(SessionStatus::Failed).unwrap();
        session.transition(SessionStatus::Reconnecting).unwrap();
        session.transition(SessionStatus::Failed).unwrap();
        session.transition(SessionStatus::Reconnecting).unwrap();
        session.transition(SessionStatus::Active).unwrap();
        session.transition(SessionStatus::Failed).unwrap();
        session.transition(SessionStatus::PermanentlyFailed).unwrap();
        assert!(session.transition(SessionStatus::Active).is_err());
        session.transition(SessionStatus::Destroyed).unwrap();
        assert!(session.transition(SessionStatus::Destroyed).is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::PermanentlyFailed.is_terminal());
        assert!(SessionStatus::Destroyed.is_terminal());
        assert!(!SessionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_push_pending_evicts_oldest() {
        let mut session = session_with_queue(2);
        assert!(session.push_pending(env("a")).is_none());
        assert!(session.push_pending(env("b")).is_none());
        let evicted = session.push_pending(env("c")).unwrap();
        assert_eq!(evicted.event_name, "a");
        let names: Vec<_> = session.pending().map(|e| e.event_name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_zero_capacity_never_queues() {
        let mut session = session_with_queue(0);
        let dropped = session.push_pending(env("a")).unwrap();
        assert_eq!(dropped.event_name, "a");
        assert_eq!(session.pending_len(), 0);
    }

    #[test]
    fn test_restore_pending_keeps_order_and_bound() {
        let mut session = session_with_queue(3);
        session.push_pending(env("a"));
        session.push_pending(env("b"));
        let drained = session.take_pending();
        assert_eq!(session.pending_len(), 0);

        session.push_pending(env("c"));
        session.push_pending(env("d"));
        let dropped = session.restore_pending(drained);
        assert_eq!(dropped, 1);
        let names: Vec<_> = session.pending().map(|e| e.event_name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_subscribers() {
        let mut session = session_with_queue(10);
        assert!(session.subscribe("x", "sub-1"));
        assert!(!session.subscribe("x", "sub-1"));
        assert!(session.subscribe("x", "sub-2"));
        assert!(session.subscribe("y", "sub-1"));
        assert_eq!(session.subscriber_count(), 3);

        assert!(session.unsubscribe("y", "sub-1"));
        assert!(!session.subscribers.contains_key("y"));
        assert!(!session.unsubscribe("y", "sub-1"));
        assert_eq!(session.subscriber_count(), 2);
    }

    #[test]
    fn test_info_snapshot() {
        let mut session = session_with_queue(10);
        session.subscribe("x", "sub-1");
        session.push_pending(env("a"));
        let info = session.info();
        assert_eq!(info.id, "s1");
        assert_eq!(info.pending_count, 1);
        assert_eq!(info.subscribers["x"], vec!["sub-1".to_string()]);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["target"], "v1");
        assert!(json.get("last_activity").is_none());
        assert!(json.get("creation").is_none());
    }

    #[test]
    fn test_info_carries_creation_params() {
        let params = SurfaceParams {
            url: "app://legacy/billing.html".to_string(),
            features: None,
        };
        let options = SessionOptions::for_target("v1").with_creation(params.clone());
        let session = Session::new("s1", SurfaceRef::from("v1"), options, &SessionConfig::default());

        let info = session.info();
        assert_eq!(info.creation, Some(params));
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["creation"]["url"], "app://legacy/billing.html");
    }
}
