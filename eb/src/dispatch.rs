//! Message dispatcher
//!
//! Builds envelopes, runs the interceptor chain, calls the transport under a
//! deadline and classifies failures. Failures are handed to recovery over a
//! channel so the dispatcher never calls the coordinator directly.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{Envelope, EnvelopeKind, HEARTBEAT_EVENT, RECONNECT_EVENT, SessionStatus, SurfaceRef};
use crate::error::{BridgeResult, FailureKind, TransportError};
use crate::events::{BridgeEvent, EventBus};
use crate::interceptor::{ChainOutcome, InterceptorChain, run_chain};
use crate::registry::RegistryHandle;
use crate::transport::TransportAdapter;

/// What to do when a send fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Keep the envelope for replay
    pub queue_on_failure: bool,
    /// Hand the failure to recovery
    pub report_failure: bool,
}

impl SendOptions {
    /// Normal events: queue and recover
    pub const EVENT: Self = Self {
        queue_on_failure: true,
        report_failure: true,
    };
    /// Commands are never queued
    pub const COMMAND: Self = Self {
        queue_on_failure: false,
        report_failure: true,
    };
    /// Heartbeats, handshakes and replays
    pub const NO_RETRY: Self = Self {
        queue_on_failure: false,
        report_failure: false,
    };
}

/// Result of one send
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SendOutcome {
    Delivered,
    /// An interceptor vetoed the envelope
    Denied,
    /// Delivery failed; the envelope waits in the pending queue
    Queued(FailureKind),
    /// Delivery failed and the envelope was dropped
    Failed(FailureKind),
}

impl SendOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// Failure handed to the recovery coordinator
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub session_id: String,
    pub kind: FailureKind,
    pub detail: String,
    /// Activity marker seen when the failure was detected; recovery is
    /// skipped if the session was active again since
    pub observed_activity: Option<Instant>,
}

/// Sends envelopes to surfaces
#[derive(Clone)]
pub struct Dispatcher {
    registry: RegistryHandle,
    transport: Arc<dyn TransportAdapter>,
    interceptors: Arc<RwLock<InterceptorChain>>,
    bus: Arc<EventBus>,
    failures: mpsc::UnboundedSender<FailureReport>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: RegistryHandle,
        transport: Arc<dyn TransportAdapter>,
        interceptors: Arc<RwLock<InterceptorChain>>,
        bus: Arc<EventBus>,
        failures: mpsc::UnboundedSender<FailureReport>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            interceptors,
            bus,
            failures,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn TransportAdapter> {
        &self.transport
    }

    /// Send an event to an active session
    pub async fn send_event(&self, session_id: &str, event_name: &str, data: Value) -> BridgeResult<SendOutcome> {
        debug!(%session_id, %event_name, "Dispatcher::send_event: called");
        self.send(session_id, EnvelopeKind::Event, event_name, data, SendOptions::EVENT)
            .await
    }

    /// Send a command; failures are reported but never queued
    pub async fn execute_command(&self, session_id: &str, command: &str, args: Value) -> BridgeResult<SendOutcome> {
        debug!(%session_id, %command, "Dispatcher::execute_command: called");
        self.send(session_id, EnvelopeKind::Command, command, args, SendOptions::COMMAND)
            .await
    }

    /// Probe a session; failures are neither queued nor reported
    pub async fn send_heartbeat(&self, session_id: &str) -> BridgeResult<SendOutcome> {
        debug!(%session_id, "Dispatcher::send_heartbeat: called");
        let payload = json!({ "timestamp": chrono::Utc::now().timestamp_millis() });
        self.send(
            session_id,
            EnvelopeKind::Heartbeat,
            HEARTBEAT_EVENT,
            payload,
            SendOptions::NO_RETRY,
        )
        .await
    }

    /// Send a reconnect handshake regardless of status, bounded by `deadline`
    pub async fn send_handshake(&self, session_id: &str, deadline: Duration) -> BridgeResult<bool> {
        debug!(%session_id, ?deadline, "Dispatcher::send_handshake: called");
        let target = self.registry.resolve_target(session_id, false).await?;
        let payload = json!({ "timestamp": chrono::Utc::now().timestamp_millis() });
        let envelope = Envelope::outbound(EnvelopeKind::Handshake, session_id, RECONNECT_EVENT, payload);
        let outcome = self
            .deliver_within(&target, envelope, SendOptions::NO_RETRY, deadline)
            .await;
        Ok(outcome.delivered())
    }

    /// Build, intercept and deliver one envelope
    pub async fn send(
        &self,
        session_id: &str,
        kind: EnvelopeKind,
        event_name: &str,
        payload: Value,
        opts: SendOptions,
    ) -> BridgeResult<SendOutcome> {
        let target = self.registry.resolve_target(session_id, true).await?;
        let envelope = Envelope::outbound(kind, session_id, event_name, payload);

        let envelope = if matches!(kind, EnvelopeKind::Event | EnvelopeKind::Command) {
            let interceptors = self
                .interceptors
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .for_event(event_name);
            match run_chain(&interceptors, envelope)? {
                ChainOutcome::Proceed(envelope) => envelope,
                ChainOutcome::Denied { by } => {
                    debug!(%session_id, %event_name, %by, "Dispatcher::send: denied by interceptor");
                    return Ok(SendOutcome::Denied);
                }
            }
        } else {
            envelope
        };

        Ok(self.deliver(&target, envelope, opts).await)
    }

    /// Re-send a queued envelope without queueing or reporting on failure
    pub async fn replay(&self, envelope: Envelope) -> BridgeResult<bool> {
        debug!(session_id = %envelope.session_id, envelope_id = %envelope.id, "Dispatcher::replay: called");
        let target = self.registry.resolve_target(&envelope.session_id, false).await?;
        Ok(self.deliver(&target, envelope, SendOptions::NO_RETRY).await.delivered())
    }

    /// Flush envelopes after recovery; undeliverable ones are dropped
    pub async fn flush_pending(&self, session_id: &str, envelopes: Vec<Envelope>) -> usize {
        debug!(%session_id, count = envelopes.len(), "Dispatcher::flush_pending: called");
        let mut delivered = 0;
        for envelope in envelopes {
            let envelope_id = envelope.id.clone();
            match self.replay(envelope).await {
                Ok(true) => delivered += 1,
                Ok(false) => warn!(%session_id, %envelope_id, "Dispatcher::flush_pending: dropped undeliverable envelope"),
                Err(e) => {
                    debug!(%session_id, error = %e, "Dispatcher::flush_pending: session gone, stopping");
                    break;
                }
            }
        }
        delivered
    }

    /// Send to every active session concurrently; returns the delivered count
    pub async fn broadcast_event(&self, event_name: &str, data: Value) -> usize {
        debug!(%event_name, "Dispatcher::broadcast_event: called");
        let sessions = match self.registry.list().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Dispatcher::broadcast_event: registry unavailable");
                return 0;
            }
        };

        let sends = sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Active)
            .map(|s| self.send_event(&s.id, event_name, data.clone()));

        let delivered = join_all(sends)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(SendOutcome::Delivered)))
            .count();
        debug!(%event_name, delivered, "Dispatcher::broadcast_event: done");
        delivered
    }

    async fn deliver(&self, target: &SurfaceRef, envelope: Envelope, opts: SendOptions) -> SendOutcome {
        self.deliver_within(target, envelope, opts, self.send_timeout).await
    }

    async fn deliver_within(
        &self,
        target: &SurfaceRef,
        envelope: Envelope,
        opts: SendOptions,
        deadline: Duration,
    ) -> SendOutcome {
        let session_id = envelope.session_id.clone();
        let result = match tokio::time::timeout(deadline, self.transport.send(target, &envelope)).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(TransportError::Other("surface did not acknowledge".to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout),
        };

        let error = match result {
            Ok(()) => {
                let counts = matches!(envelope.kind, EnvelopeKind::Event | EnvelopeKind::Command);
                if let Err(e) = self.registry.record_activity(&session_id, counts).await {
                    warn!(%session_id, error = %e, "Dispatcher: failed to record activity");
                }
                if envelope.kind == EnvelopeKind::Event {
                    self.bus.emit(BridgeEvent::EventSent {
                        session_id: session_id.clone(),
                        envelope,
                    });
                }
                return SendOutcome::Delivered;
            }
            Err(e) => e,
        };

        let kind = self.classify(target, &error).await;
        warn!(%session_id, %target, event_name = %envelope.event_name, %kind, error = %error, "Dispatcher: delivery failed");

        let mut queued = false;
        if opts.queue_on_failure {
            let envelope_id = envelope.id.clone();
            match self.registry.push_pending(&session_id, envelope).await {
                // A zero-capacity queue hands the new envelope straight back
                Ok(Some(dropped)) if dropped.id == envelope_id => {
                    debug!(%session_id, %envelope_id, "Dispatcher: queue disabled, envelope dropped");
                }
                Ok(_) => queued = true,
                Err(e) => debug!(%session_id, error = %e, "Dispatcher: could not queue envelope"),
            }
        }

        if opts.report_failure {
            let report = FailureReport {
                session_id: session_id.clone(),
                kind,
                detail: error.to_string(),
                observed_activity: None,
            };
            if self.failures.send(report).is_err() {
                debug!(%session_id, "Dispatcher: recovery channel closed, failure not reported");
            }
        }

        if queued {
            SendOutcome::Queued(kind)
        } else {
            SendOutcome::Failed(kind)
        }
    }

    async fn classify(&self, target: &SurfaceRef, error: &TransportError) -> FailureKind {
        match error {
            TransportError::PermissionDenied(_) => FailureKind::PermissionDenied,
            TransportError::SurfaceClosed => FailureKind::SurfaceClosed,
            _ if !self.transport.is_alive(target).await => FailureKind::SurfaceClosed,
            other => other.classify(),
        }
    }
}
