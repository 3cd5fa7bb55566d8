//! SessionRegistry - actor that owns every live session
//!
//! All mutation happens inside one task, one request at a time. Callers hold
//! a [`RegistryHandle`] and only ever receive snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::handle::RegistryHandle;
use super::messages::{AttemptEnd, AttemptStart, RecoveryGate, RegistryMetrics, RegistryRequest, destroyed_notice};
use crate::config::SessionConfig;
use crate::domain::{Envelope, Session, SessionInfo, SessionOptions, SessionStatus, SurfaceRef, generate_id};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, EventBus};

/// Default request channel buffer
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Registry state, owned by the actor task
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    defaults: SessionConfig,
    default_surface: Option<SurfaceRef>,
    bus: Arc<EventBus>,
    sessions_created: u64,
    sessions_destroyed: u64,
    requests_processed: u64,
}

impl SessionRegistry {
    pub(crate) fn new(defaults: SessionConfig, bus: Arc<EventBus>) -> Self {
        Self {
            sessions: HashMap::new(),
            defaults,
            default_surface: None,
            bus,
            sessions_created: 0,
            sessions_destroyed: 0,
            requests_processed: 0,
        }
    }

    /// Spawn the registry actor and return a handle to it
    pub fn spawn(defaults: SessionConfig, bus: Arc<EventBus>, buffer: usize) -> RegistryHandle {
        debug!(buffer, "SessionRegistry::spawn: called");
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let registry = Self::new(defaults, bus);
        tokio::spawn(registry.run(rx));
        info!("SessionRegistry spawned");
        RegistryHandle::new(tx)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RegistryRequest>) {
        debug!("SessionRegistry actor started");

        while let Some(req) = rx.recv().await {
            self.requests_processed += 1;
            match req {
                RegistryRequest::Create { options, reply } => {
                    let _ = reply.send(self.create(options));
                }
                RegistryRequest::Destroy { id, reason, reply } => {
                    let _ = reply.send(self.destroy(&id, &reason));
                }
                RegistryRequest::DestroyIfIdle { id, reason, reply } => {
                    let _ = reply.send(self.destroy_if_idle(&id, &reason));
                }
                RegistryRequest::DestroyAll { reason, reply } => {
                    let ids: Vec<String> = self.sessions.keys().cloned().collect();
                    let count = ids.iter().filter(|id| self.destroy(id, &reason)).count();
                    let _ = reply.send(count);
                }
                RegistryRequest::Get { id, reply } => {
                    let _ = reply.send(self.sessions.get(&id).map(Session::info));
                }
                RegistryRequest::List { reply } => {
                    let _ = reply.send(self.list());
                }
                RegistryRequest::SetDefaultSurface { target } => {
                    debug!(?target, "SessionRegistry: SetDefaultSurface");
                    self.default_surface = target;
                }
                RegistryRequest::ResolveTarget {
                    id,
                    require_active,
                    reply,
                } => {
                    let _ = reply.send(self.resolve_target(&id, require_active));
                }
                RegistryRequest::RecordActivity { id, delivered, reply } => {
                    let _ = reply.send(self.record_activity(&id, delivered));
                }
                RegistryRequest::Subscribe {
                    id,
                    event_name,
                    subscriber_id,
                    reply,
                } => {
                    let result = self
                        .session_mut(&id)
                        .map(|s| s.subscribe(&event_name, &subscriber_id));
                    let _ = reply.send(result);
                }
                RegistryRequest::Unsubscribe {
                    id,
                    event_name,
                    subscriber_id,
                    reply,
                } => {
                    let result = self
                        .session_mut(&id)
                        .map(|s| s.unsubscribe(&event_name, &subscriber_id));
                    let _ = reply.send(result);
                }
                RegistryRequest::Inbound { envelope, reply } => {
                    let _ = reply.send(self.inbound(envelope));
                }
                RegistryRequest::PushPending { id, envelope, reply } => {
                    let _ = reply.send(self.push_pending(&id, envelope));
                }
                RegistryRequest::TakePending { id, reply } => {
                    let _ = reply.send(self.session_mut(&id).map(Session::take_pending));
                }
                RegistryRequest::RestorePending { id, envelopes, reply } => {
                    let result = self.session_mut(&id).map(|s| s.restore_pending(envelopes));
                    if let Ok(dropped) = result
                        && dropped > 0
                    {
                        warn!(%id, dropped, "SessionRegistry: restore overflowed pending queue");
                    }
                    let _ = reply.send(result);
                }
                RegistryRequest::StoreData { id, key, value, reply } => {
                    let result = self.session_mut(&id).map(|s| {
                        s.data.insert(key, value);
                    });
                    let _ = reply.send(result);
                }
                RegistryRequest::Retarget { id, target, reply } => {
                    debug!(%id, %target, "SessionRegistry: Retarget");
                    let result = self.session_mut(&id).map(|s| s.target = target);
                    let _ = reply.send(result);
                }
                RegistryRequest::BeginRecovery {
                    id,
                    observed_activity,
                    reply,
                } => {
                    let _ = reply.send(self.begin_recovery(&id, observed_activity));
                }
                RegistryRequest::StartAttempt { id, max_retries, reply } => {
                    let _ = reply.send(self.start_attempt(&id, max_retries));
                }
                RegistryRequest::FinishAttempt {
                    id,
                    success,
                    max_retries,
                    reply,
                } => {
                    let _ = reply.send(self.finish_attempt(&id, success, max_retries));
                }
                RegistryRequest::MarkPermanentlyFailed { id, reason, reply } => {
                    let _ = reply.send(self.mark_permanently_failed(&id, &reason));
                }
                RegistryRequest::Metrics { reply } => {
                    let _ = reply.send(self.metrics());
                }
                RegistryRequest::Shutdown => {
                    info!("SessionRegistry: shutdown requested");
                    break;
                }
            }
        }

        debug!(sessions = self.sessions.len(), "SessionRegistry actor stopped");
    }

    fn session_mut(&mut self, id: &str) -> BridgeResult<&mut Session> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))
    }

    pub(crate) fn create(&mut self, options: SessionOptions) -> BridgeResult<SessionInfo> {
        let id = options.session_id.clone().unwrap_or_else(|| generate_id("session"));
        debug!(%id, "SessionRegistry::create: called");

        if self.sessions.contains_key(&id) {
            return Err(BridgeError::Validation(format!("session id already in use: {}", id)));
        }

        if let Some(config) = &options.config {
            config.validate()?;
        }

        let target = options
            .target
            .clone()
            .or_else(|| self.default_surface.clone())
            .ok_or_else(|| {
                BridgeError::Validation("no target surface supplied and no default surface configured".to_string())
            })?;

        let session = Session::new(id.clone(), target, options, &self.defaults);
        let info = session.info();
        self.sessions.insert(id.clone(), session);
        self.sessions_created += 1;

        info!(%id, target = %info.target, module = %info.module, "Session created");
        self.bus.emit(BridgeEvent::SessionCreated {
            session_id: id,
            target: info.target.clone(),
            module: info.module.clone(),
        });
        Ok(info)
    }

    /// Remove a session, notifying each (event, subscriber) pair first
    pub(crate) fn destroy(&mut self, id: &str, reason: &str) -> bool {
        debug!(%id, %reason, "SessionRegistry::destroy: called");
        let Some(session) = self.sessions.get(id) else {
            debug!(%id, "SessionRegistry::destroy: already gone");
            return false;
        };

        let notice = destroyed_notice(id, reason);
        for subscribers in session.subscribers.values() {
            for subscriber_id in subscribers {
                self.bus.emit(BridgeEvent::SubscriberNotified {
                    session_id: id.to_string(),
                    subscriber_id: subscriber_id.clone(),
                    event_name: "session-destroyed".to_string(),
                    data: notice.clone(),
                });
            }
        }

        if let Some(mut session) = self.sessions.remove(id) {
            let _ = session.transition(SessionStatus::Destroyed);
            if session.pending_len() > 0 {
                debug!(%id, dropped = session.pending_len(), "SessionRegistry::destroy: discarding pending queue");
            }
        }
        self.sessions_destroyed += 1;

        info!(%id, %reason, "Session destroyed");
        self.bus.emit(BridgeEvent::SessionDestroyed {
            session_id: id.to_string(),
            reason: reason.to_string(),
        });
        true
    }

    pub(crate) fn destroy_if_idle(&mut self, id: &str, reason: &str) -> bool {
        let expired = self
            .sessions
            .get(id)
            .is_some_and(|session| session.idle() > session.config.timeout());
        if !expired {
            debug!(%id, "SessionRegistry::destroy_if_idle: active again or gone");
            return false;
        }
        self.destroy(id, reason)
    }

    fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.values().map(Session::info).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    fn resolve_target(&self, id: &str, require_active: bool) -> BridgeResult<SurfaceRef> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))?;
        if require_active && session.status() != SessionStatus::Active {
            debug!(%id, status = %session.status(), "SessionRegistry::resolve_target: not active");
            return Err(BridgeError::SessionNotActive {
                id: id.to_string(),
                status: session.status(),
            });
        }
        Ok(session.target.clone())
    }

    fn record_activity(&mut self, id: &str, delivered: bool) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.touch();
                if delivered {
                    session.sent_events += 1;
                }
                true
            }
            None => false,
        }
    }

    fn inbound(&mut self, envelope: Envelope) -> BridgeResult<usize> {
        let id = envelope.session_id.clone();
        debug!(%id, event_name = %envelope.event_name, "SessionRegistry::inbound: called");
        let session = self.session_mut(&id)?;
        session.touch();
        let subscribers: Vec<String> = session
            .subscribers
            .get(&envelope.event_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        for subscriber_id in &subscribers {
            self.bus.emit(BridgeEvent::SubscriberNotified {
                session_id: id.clone(),
                subscriber_id: subscriber_id.clone(),
                event_name: envelope.event_name.clone(),
                data: envelope.payload.clone(),
            });
        }
        self.bus.emit(BridgeEvent::InboundEvent {
            session_id: id,
            envelope,
        });
        Ok(subscribers.len())
    }

    fn push_pending(&mut self, id: &str, envelope: Envelope) -> BridgeResult<Option<Envelope>> {
        let session = self.session_mut(id)?;
        let evicted = session.push_pending(envelope);
        if let Some(dropped) = &evicted {
            warn!(%id, envelope_id = %dropped.id, event_name = %dropped.event_name, "Pending queue full, dropped oldest envelope");
        }
        Ok(evicted)
    }

    pub(crate) fn begin_recovery(&mut self, id: &str, observed_activity: Option<Instant>) -> RecoveryGate {
        debug!(%id, "SessionRegistry::begin_recovery: called");
        let Some(session) = self.sessions.get_mut(id) else {
            return RecoveryGate::Missing;
        };

        match session.status() {
            SessionStatus::Failed | SessionStatus::Reconnecting => RecoveryGate::AlreadyRecovering,
            SessionStatus::PermanentlyFailed | SessionStatus::Destroyed => RecoveryGate::Terminal,
            SessionStatus::Active => {
                if let Some(observed) = observed_activity
                    && session.last_activity > observed
                {
                    debug!(%id, "SessionRegistry::begin_recovery: activity since report, skipping");
                    return RecoveryGate::Stale;
                }
                match session.transition(SessionStatus::Failed) {
                    Ok(()) => RecoveryGate::Proceed,
                    Err(e) => {
                        error!(%id, error = %e, "SessionRegistry::begin_recovery: transition rejected");
                        RecoveryGate::Terminal
                    }
                }
            }
        }
    }

    pub(crate) fn start_attempt(&mut self, id: &str, max_retries: u32) -> AttemptStart {
        let Some(session) = self.sessions.get_mut(id) else {
            return AttemptStart::Missing;
        };
        debug!(%id, attempts = session.recovery_attempts, max_retries, "SessionRegistry::start_attempt: called");

        match session.status() {
            SessionStatus::Failed => {}
            SessionStatus::PermanentlyFailed => return AttemptStart::Exhausted,
            _ => return AttemptStart::Missing,
        }

        if session.recovery_attempts >= max_retries {
            self.fail_permanently(id, "recovery attempts exhausted");
            return AttemptStart::Exhausted;
        }

        session.recovery_attempts += 1;
        let attempt = session.recovery_attempts;
        match session.transition(SessionStatus::Reconnecting) {
            Ok(()) => AttemptStart::Started(attempt),
            Err(_) => AttemptStart::Missing,
        }
    }

    pub(crate) fn finish_attempt(&mut self, id: &str, success: bool, max_retries: u32) -> AttemptEnd {
        let Some(session) = self.sessions.get_mut(id) else {
            return AttemptEnd::Missing;
        };
        debug!(%id, success, attempts = session.recovery_attempts, "SessionRegistry::finish_attempt: called");

        if session.status() != SessionStatus::Reconnecting {
            return AttemptEnd::Missing;
        }

        if success {
            let attempts = session.recovery_attempts;
            if session.transition(SessionStatus::Active).is_err() {
                return AttemptEnd::Missing;
            }
            session.recovery_attempts = 0;
            session.touch();
            let pending = session.take_pending();

            info!(%id, attempts, "Session recovered");
            self.bus.emit(BridgeEvent::SessionRecovered {
                session_id: id.to_string(),
                attempts,
            });
            return AttemptEnd::Recovered { pending };
        }

        if session.transition(SessionStatus::Failed).is_err() {
            return AttemptEnd::Missing;
        }
        let attempts = session.recovery_attempts;
        if attempts >= max_retries {
            self.fail_permanently(id, "recovery attempts exhausted");
            AttemptEnd::PermanentlyFailed
        } else {
            AttemptEnd::Retry(attempts)
        }
    }

    pub(crate) fn mark_permanently_failed(&mut self, id: &str, reason: &str) -> bool {
        let Some(session) = self.sessions.get_mut(id) else {
            return false;
        };
        debug!(%id, %reason, status = %session.status(), "SessionRegistry::mark_permanently_failed: called");

        match session.status() {
            SessionStatus::PermanentlyFailed => return true,
            SessionStatus::Destroyed => return false,
            SessionStatus::Active | SessionStatus::Reconnecting => {
                let _ = session.transition(SessionStatus::Failed);
            }
            SessionStatus::Failed => {}
        }
        self.fail_permanently(id, reason)
    }

    /// `failed -> permanently_failed`, emitting `session-failed` once
    fn fail_permanently(&mut self, id: &str, reason: &str) -> bool {
        let Some(session) = self.sessions.get_mut(id) else {
            return false;
        };
        if let Err(e) = session.transition(SessionStatus::PermanentlyFailed) {
            warn!(%id, error = %e, "SessionRegistry::fail_permanently: transition rejected");
            return false;
        }
        let attempts = session.recovery_attempts;
        error!(%id, %reason, attempts, "Session permanently failed");
        self.bus.emit(BridgeEvent::SessionFailed {
            session_id: id.to_string(),
            reason: reason.to_string(),
            attempts,
        });
        true
    }

    fn metrics(&self) -> RegistryMetrics {
        let mut metrics = RegistryMetrics {
            sessions: self.sessions.len(),
            sessions_created: self.sessions_created,
            sessions_destroyed: self.sessions_destroyed,
            requests_processed: self.requests_processed,
            ..Default::default()
        };
        for session in self.sessions.values() {
            match session.status() {
                SessionStatus::Active => metrics.active += 1,
                SessionStatus::Reconnecting => metrics.reconnecting += 1,
                SessionStatus::Failed => metrics.failed += 1,
                SessionStatus::PermanentlyFailed => metrics.permanently_failed += 1,
                SessionStatus::Destroyed => {}
            }
            metrics.total_subscribers += session.subscriber_count();
            metrics.queued_events += session.pending_len();
            metrics.recovery_attempts += u64::from(session.recovery_attempts);
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::time::Duration;

    fn registry() -> (SessionRegistry, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(64));
        (SessionRegistry::new(SessionConfig::default(), bus.clone()), bus)
    }

    fn record_names(bus: &EventBus) -> Arc<Mutex<Vec<String>>> {
        let names = Arc::new(Mutex::new(Vec::new()));
        for name in [
            "session-created",
            "session-destroyed",
            "session-recovered",
            "session-failed",
            "subscriber-notified",
        ] {
            let names = names.clone();
            bus.on(name, move |e| names.lock().unwrap().push(e.name().to_string()));
        }
        names
    }

    #[test]
    fn test_create_requires_target() {
        let (mut reg, _bus) = registry();
        let err = reg.create(SessionOptions::default()).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));

        reg.default_surface = Some(SurfaceRef::from("main-view"));
        let info = reg.create(SessionOptions::default()).unwrap();
        assert_eq!(info.target.as_str(), "main-view");
        assert!(info.id.starts_with("session-"));
    }

    #[test]
    fn test_create_rejects_zero_heartbeat_override() {
        let (mut reg, _bus) = registry();
        let config = SessionConfig {
            heartbeat_interval_ms: 0,
            ..Default::default()
        };
        let err = reg
            .create(SessionOptions::for_target("v1").with_config(config))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        assert!(reg.sessions.is_empty());
    }

    #[test]
    fn test_destroy_if_idle_rechecks_activity() {
        let (mut reg, _bus) = registry();
        let config = SessionConfig {
            timeout_ms: 20,
            ..Default::default()
        };
        let id = reg
            .create(SessionOptions::for_target("v1").with_config(config))
            .unwrap()
            .id;
        assert!(!reg.destroy_if_idle(&id, "timeout"));

        std::thread::sleep(Duration::from_millis(30));
        reg.sessions.get_mut(&id).unwrap().touch();
        assert!(!reg.destroy_if_idle(&id, "timeout"));
        assert!(reg.sessions.contains_key(&id));

        std::thread::sleep(Duration::from_millis(30));
        assert!(reg.destroy_if_idle(&id, "timeout"));
        assert!(!reg.destroy_if_idle(&id, "timeout"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (mut reg, _bus) = registry();
        reg.create(SessionOptions::for_target("v1").with_id("main")).unwrap();
        let err = reg.create(SessionOptions::for_target("v1").with_id("main")).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[test]
    fn test_destroy_notifies_subscribers_then_removes() {
        let (mut reg, bus) = registry();
        let names = record_names(&bus);
        let id = reg.create(SessionOptions::for_target("v1")).unwrap().id;
        let session = reg.sessions.get_mut(&id).unwrap();
        session.subscribe("essay:saved", "sub-1");
        session.subscribe("essay:saved", "sub-2");
        session.subscribe("timer:tick", "sub-1");

        assert!(reg.destroy(&id, "manual"));
        assert!(!reg.destroy(&id, "manual"));
        assert!(!reg.sessions.contains_key(&id));

        let names = names.lock().unwrap();
        assert_eq!(
            *names,
            vec![
                "session-created",
                "subscriber-notified",
                "subscriber-notified",
                "subscriber-notified",
                "session-destroyed"
            ]
        );
    }

    #[test]
    fn test_recovery_gate() {
        let (mut reg, _bus) = registry();
        let id = reg.create(SessionOptions::for_target("v1")).unwrap().id;

        let before = Instant::now() - std::time::Duration::from_secs(1);
        assert_eq!(reg.begin_recovery(&id, Some(before)), RecoveryGate::Stale);

        assert_eq!(reg.begin_recovery(&id, None), RecoveryGate::Proceed);
        assert_eq!(reg.begin_recovery(&id, None), RecoveryGate::AlreadyRecovering);
        assert_eq!(reg.begin_recovery("missing", None), RecoveryGate::Missing);
    }

    #[test]
    fn test_attempts_bounded_by_max_retries() {
        let (mut reg, bus) = registry();
        let names = record_names(&bus);
        let id = reg.create(SessionOptions::for_target("v1")).unwrap().id;
        assert_eq!(reg.begin_recovery(&id, None), RecoveryGate::Proceed);

        for k in 1..=2 {
            assert_eq!(reg.start_attempt(&id, 3), AttemptStart::Started(k));
            assert_eq!(reg.finish_attempt(&id, false, 3), AttemptEnd::Retry(k));
        }
        assert_eq!(reg.start_attempt(&id, 3), AttemptStart::Started(3));
        assert_eq!(reg.finish_attempt(&id, false, 3), AttemptEnd::PermanentlyFailed);

        let session = &reg.sessions[&id];
        assert_eq!(session.status(), SessionStatus::PermanentlyFailed);
        assert_eq!(session.recovery_attempts, 3);
        assert_eq!(reg.start_attempt(&id, 3), AttemptStart::Exhausted);
        assert_eq!(reg.begin_recovery(&id, None), RecoveryGate::Terminal);

        let failed = names.lock().unwrap().iter().filter(|n| *n == "session-failed").count();
        assert_eq!(failed, 1);
    }

    #[test]
    fn test_successful_attempt_resets_and_returns_pending() {
        let (mut reg, _bus) = registry();
        let id = reg.create(SessionOptions::for_target("v1")).unwrap().id;
        reg.push_pending(&id, Envelope::outbound(crate::domain::EnvelopeKind::Event, &id, "x", json!(1)))
            .unwrap();

        reg.begin_recovery(&id, None);
        assert_eq!(reg.start_attempt(&id, 3), AttemptStart::Started(1));
        let AttemptEnd::Recovered { pending } = reg.finish_attempt(&id, true, 3) else {
            panic!("expected recovery");
        };
        assert_eq!(pending.len(), 1);

        let session = &reg.sessions[&id];
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.recovery_attempts, 0);
        assert_eq!(session.pending_len(), 0);
    }

    #[test]
    fn test_finish_after_destroy_is_missing() {
        let (mut reg, _bus) = registry();
        let id = reg.create(SessionOptions::for_target("v1")).unwrap().id;
        reg.begin_recovery(&id, None);
        reg.start_attempt(&id, 3);
        reg.destroy(&id, "manual");
        assert_eq!(reg.finish_attempt(&id, true, 3), AttemptEnd::Missing);
    }

    #[test]
    fn test_mark_permanently_failed_from_reconnecting() {
        let (mut reg, _bus) = registry();
        let id = reg.create(SessionOptions::for_target("v1")).unwrap().id;
        reg.begin_recovery(&id, None);
        reg.start_attempt(&id, 3);
        assert!(reg.mark_permanently_failed(&id, "popup blocked"));
        assert!(reg.mark_permanently_failed(&id, "popup blocked"));
        assert_eq!(reg.sessions[&id].status(), SessionStatus::PermanentlyFailed);
    }

    #[test]
    fn test_inbound_notifies_subscribers() {
        let (mut reg, bus) = registry();
        let id = reg.create(SessionOptions::for_target("v1")).unwrap().id;
        reg.sessions.get_mut(&id).unwrap().subscribe("essay:submitted", "sub-1");

        let mut rx = bus.subscribe();
        let count = reg
            .inbound(Envelope::inbound(&id, "essay:submitted", json!({"words": 250})))
            .unwrap();
        assert_eq!(count, 1);

        let first = rx.try_recv().unwrap();
        assert!(matches!(first, BridgeEvent::SubscriberNotified { ref data, .. } if data["words"] == 250));
        assert_eq!(rx.try_recv().unwrap().name(), "inbound-event");

        assert!(reg.inbound(Envelope::inbound("missing", "x", Value::Null)).is_err());
    }

    #[test]
    fn test_metrics() {
        let (mut reg, _bus) = registry();
        let a = reg.create(SessionOptions::for_target("v1")).unwrap().id;
        reg.create(SessionOptions::for_target("v2")).unwrap();
        reg.sessions.get_mut(&a).unwrap().subscribe("x", "sub-1");
        reg.begin_recovery(&a, None);
        reg.start_attempt(&a, 3);

        let metrics = reg.metrics();
        assert_eq!(metrics.sessions, 2);
        assert_eq!(metrics.active, 1);
        assert_eq!(metrics.reconnecting, 1);
        assert_eq!(metrics.total_subscribers, 1);
        assert_eq!(metrics.recovery_attempts, 1);
        assert_eq!(metrics.sessions_created, 2);
    }
}
