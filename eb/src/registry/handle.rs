//! Cloneable handle to the registry actor

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use super::messages::{AttemptEnd, AttemptStart, RecoveryGate, RegistryMetrics, RegistryRequest};
use crate::domain::{Envelope, SessionInfo, SessionOptions, SurfaceRef, SyncedValue};
use crate::error::{BridgeError, BridgeResult};

/// Handle used by every other component to reach the session map
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryRequest>,
}

impl RegistryHandle {
    pub(crate) fn new(tx: mpsc::Sender<RegistryRequest>) -> Self {
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> RegistryRequest) -> BridgeResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(build(reply_tx)).await.map_err(|_| BridgeError::Channel)?;
        reply_rx.await.map_err(|_| BridgeError::Channel)
    }

    // === Lifecycle ===

    pub async fn create(&self, options: SessionOptions) -> BridgeResult<SessionInfo> {
        debug!(session_id = ?options.session_id, target = ?options.target, "RegistryHandle::create: called");
        self.request(|reply| RegistryRequest::Create { options, reply }).await?
    }

    /// Destroy a session; false if it did not exist
    pub async fn destroy(&self, id: &str, reason: &str) -> BridgeResult<bool> {
        debug!(%id, %reason, "RegistryHandle::destroy: called");
        self.request(|reply| RegistryRequest::Destroy {
            id: id.to_string(),
            reason: reason.to_string(),
            reply,
        })
        .await
    }

    /// Destroy a session whose silence exceeds its timeout at the time the
    /// registry handles the request
    pub async fn destroy_if_idle(&self, id: &str, reason: &str) -> BridgeResult<bool> {
        debug!(%id, %reason, "RegistryHandle::destroy_if_idle: called");
        self.request(|reply| RegistryRequest::DestroyIfIdle {
            id: id.to_string(),
            reason: reason.to_string(),
            reply,
        })
        .await
    }

    pub async fn destroy_all(&self, reason: &str) -> BridgeResult<usize> {
        debug!(%reason, "RegistryHandle::destroy_all: called");
        self.request(|reply| RegistryRequest::DestroyAll {
            reason: reason.to_string(),
            reply,
        })
        .await
    }

    pub async fn get(&self, id: &str) -> BridgeResult<Option<SessionInfo>> {
        debug!(%id, "RegistryHandle::get: called");
        self.request(|reply| RegistryRequest::Get {
            id: id.to_string(),
            reply,
        })
        .await
    }

    pub async fn list(&self) -> BridgeResult<Vec<SessionInfo>> {
        debug!("RegistryHandle::list: called");
        self.request(|reply| RegistryRequest::List { reply }).await
    }

    pub async fn set_default_surface(&self, target: Option<SurfaceRef>) -> BridgeResult<()> {
        debug!(?target, "RegistryHandle::set_default_surface: called");
        self.tx
            .send(RegistryRequest::SetDefaultSurface { target })
            .await
            .map_err(|_| BridgeError::Channel)
    }

    // === Delivery bookkeeping ===

    pub async fn resolve_target(&self, id: &str, require_active: bool) -> BridgeResult<SurfaceRef> {
        self.request(|reply| RegistryRequest::ResolveTarget {
            id: id.to_string(),
            require_active,
            reply,
        })
        .await?
    }

    /// Record a liveness signal; false if the session is gone
    pub async fn record_activity(&self, id: &str, delivered: bool) -> BridgeResult<bool> {
        self.request(|reply| RegistryRequest::RecordActivity {
            id: id.to_string(),
            delivered,
            reply,
        })
        .await
    }

    pub async fn subscribe(&self, id: &str, event_name: &str, subscriber_id: &str) -> BridgeResult<bool> {
        debug!(%id, %event_name, %subscriber_id, "RegistryHandle::subscribe: called");
        self.request(|reply| RegistryRequest::Subscribe {
            id: id.to_string(),
            event_name: event_name.to_string(),
            subscriber_id: subscriber_id.to_string(),
            reply,
        })
        .await?
    }

    pub async fn unsubscribe(&self, id: &str, event_name: &str, subscriber_id: &str) -> BridgeResult<bool> {
        debug!(%id, %event_name, %subscriber_id, "RegistryHandle::unsubscribe: called");
        self.request(|reply| RegistryRequest::Unsubscribe {
            id: id.to_string(),
            event_name: event_name.to_string(),
            subscriber_id: subscriber_id.to_string(),
            reply,
        })
        .await?
    }

    /// Deliver an inbound event to subscribers; returns how many were notified
    pub async fn inbound(&self, envelope: Envelope) -> BridgeResult<usize> {
        self.request(|reply| RegistryRequest::Inbound { envelope, reply }).await?
    }

    /// Queue an undelivered envelope; returns the one evicted, if any
    pub async fn push_pending(&self, id: &str, envelope: Envelope) -> BridgeResult<Option<Envelope>> {
        self.request(|reply| RegistryRequest::PushPending {
            id: id.to_string(),
            envelope,
            reply,
        })
        .await?
    }

    pub async fn take_pending(&self, id: &str) -> BridgeResult<Vec<Envelope>> {
        self.request(|reply| RegistryRequest::TakePending {
            id: id.to_string(),
            reply,
        })
        .await?
    }

    pub async fn restore_pending(&self, id: &str, envelopes: Vec<Envelope>) -> BridgeResult<usize> {
        self.request(|reply| RegistryRequest::RestorePending {
            id: id.to_string(),
            envelopes,
            reply,
        })
        .await?
    }

    pub async fn store_data(&self, id: &str, key: &str, value: SyncedValue) -> BridgeResult<()> {
        self.request(|reply| RegistryRequest::StoreData {
            id: id.to_string(),
            key: key.to_string(),
            value,
            reply,
        })
        .await?
    }

    pub async fn retarget(&self, id: &str, target: SurfaceRef) -> BridgeResult<()> {
        self.request(|reply| RegistryRequest::Retarget {
            id: id.to_string(),
            target,
            reply,
        })
        .await?
    }

    // === Recovery state machine ===

    pub async fn begin_recovery(&self, id: &str, observed_activity: Option<Instant>) -> BridgeResult<RecoveryGate> {
        self.request(|reply| RegistryRequest::BeginRecovery {
            id: id.to_string(),
            observed_activity,
            reply,
        })
        .await
    }

    pub async fn start_attempt(&self, id: &str, max_retries: u32) -> BridgeResult<AttemptStart> {
        self.request(|reply| RegistryRequest::StartAttempt {
            id: id.to_string(),
            max_retries,
            reply,
        })
        .await
    }

    pub async fn finish_attempt(&self, id: &str, success: bool, max_retries: u32) -> BridgeResult<AttemptEnd> {
        self.request(|reply| RegistryRequest::FinishAttempt {
            id: id.to_string(),
            success,
            max_retries,
            reply,
        })
        .await
    }

    pub async fn mark_permanently_failed(&self, id: &str, reason: &str) -> BridgeResult<bool> {
        self.request(|reply| RegistryRequest::MarkPermanentlyFailed {
            id: id.to_string(),
            reason: reason.to_string(),
            reply,
        })
        .await
    }

    pub async fn metrics(&self) -> BridgeResult<RegistryMetrics> {
        self.request(|reply| RegistryRequest::Metrics { reply }).await
    }

    /// Stop the actor; later requests fail with `Channel`
    pub async fn shutdown(&self) -> BridgeResult<()> {
        debug!("RegistryHandle::shutdown: called");
        self.tx
            .send(RegistryRequest::Shutdown)
            .await
            .map_err(|_| BridgeError::Channel)
    }
}
