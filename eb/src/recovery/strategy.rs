//! Recovery strategies
//!
//! A strategy makes one recovery attempt for one session. It returns
//! `Ok(true)` when the session can go back to `active`, `Ok(false)` for a
//! failed attempt, and an error when recovery must stop:
//! - `SessionNotFound` means the session was destroyed meanwhile
//! - errors that require user action escalate to `permanently_failed`
//! - `Timeout` and other retryable errors count as a failed attempt

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RecoveryConfig;
use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, BridgeResult, FailureKind, TransportError};

/// Everything a strategy may use for one attempt
#[derive(Clone)]
pub struct RecoveryContext {
    pub session_id: String,
    pub kind: FailureKind,
    /// 1-based attempt number
    pub attempt: u32,
    pub dispatcher: Dispatcher,
    pub config: RecoveryConfig,
    /// Script to inject into a recreated surface
    pub bootstrap: Option<Arc<str>>,
}

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn recover(&self, ctx: &RecoveryContext) -> BridgeResult<bool>;
}

/// `connection_lost`: handshake and liveness check
pub struct ReconnectStrategy;

#[async_trait]
impl RecoveryStrategy for ReconnectStrategy {
    fn name(&self) -> &'static str {
        "reconnect"
    }

    async fn recover(&self, ctx: &RecoveryContext) -> BridgeResult<bool> {
        debug!(session_id = %ctx.session_id, attempt = ctx.attempt, "ReconnectStrategy::recover: called");
        let acked = ctx
            .dispatcher
            .send_handshake(&ctx.session_id, ctx.config.handshake_timeout())
            .await?;
        if !acked {
            debug!(session_id = %ctx.session_id, "ReconnectStrategy: handshake not acknowledged");
            return Ok(false);
        }

        let target = ctx.dispatcher.registry().resolve_target(&ctx.session_id, false).await?;
        Ok(ctx.dispatcher.transport().is_alive(&target).await)
    }
}

/// `message_timeout` and `message_send_failed`: replay the pending queue
///
/// Envelopes older than `stale-after-ms` are discarded. Failed replays go
/// back to the queue in their original order.
pub struct ReplayStrategy;

#[async_trait]
impl RecoveryStrategy for ReplayStrategy {
    fn name(&self) -> &'static str {
        "replay"
    }

    async fn recover(&self, ctx: &RecoveryContext) -> BridgeResult<bool> {
        let registry = ctx.dispatcher.registry();
        let queued = registry.take_pending(&ctx.session_id).await?;
        debug!(session_id = %ctx.session_id, queued = queued.len(), "ReplayStrategy::recover: called");

        let stale_after = ctx.config.stale_after();
        let mut failed = Vec::new();
        let mut replayed = 0;
        let mut discarded = 0;

        for envelope in queued {
            if envelope.is_stale(stale_after) {
                discarded += 1;
                continue;
            }
            match ctx.dispatcher.replay(envelope.clone()).await {
                Ok(true) => replayed += 1,
                Ok(false) => failed.push(envelope),
                Err(e) => return Err(e),
            }
        }

        info!(session_id = %ctx.session_id, replayed, discarded, failed = failed.len(), "Replayed pending queue");

        if failed.is_empty() {
            return Ok(true);
        }
        registry.restore_pending(&ctx.session_id, failed).await?;
        Ok(false)
    }
}

/// `surface_closed`: recreate the surface and rebind the session
pub struct RecreateSurfaceStrategy;

#[async_trait]
impl RecoveryStrategy for RecreateSurfaceStrategy {
    fn name(&self) -> &'static str {
        "recreate-surface"
    }

    async fn recover(&self, ctx: &RecoveryContext) -> BridgeResult<bool> {
        debug!(session_id = %ctx.session_id, attempt = ctx.attempt, "RecreateSurfaceStrategy::recover: called");
        let registry = ctx.dispatcher.registry();
        let transport = ctx.dispatcher.transport();

        let session = registry
            .get(&ctx.session_id)
            .await?
            .ok_or_else(|| BridgeError::SessionNotFound(ctx.session_id.clone()))?;

        if transport.is_alive(&session.target).await {
            debug!(session_id = %ctx.session_id, "RecreateSurfaceStrategy: surface is back");
            return Ok(true);
        }

        let Some(params) = session.creation else {
            warn!(session_id = %ctx.session_id, "RecreateSurfaceStrategy: no creation parameters");
            return Ok(false);
        };

        let ready_timeout = ctx.config.surface_ready_timeout();
        let target = match tokio::time::timeout(ready_timeout, transport.recreate(&params)).await {
            Ok(Ok(target)) => target,
            Ok(Err(TransportError::PermissionDenied(message))) => return Err(BridgeError::Permission(message)),
            Ok(Err(e)) => {
                warn!(session_id = %ctx.session_id, error = %e, "RecreateSurfaceStrategy: recreate failed");
                return Ok(false);
            }
            Err(_) => {
                warn!(session_id = %ctx.session_id, "RecreateSurfaceStrategy: recreate timed out");
                return Err(BridgeError::Timeout(ready_timeout));
            }
        };

        registry.retarget(&ctx.session_id, target.clone()).await?;

        let deadline = Instant::now() + ready_timeout;
        while !transport.is_alive(&target).await {
            if Instant::now() >= deadline {
                warn!(session_id = %ctx.session_id, %target, "RecreateSurfaceStrategy: surface never became ready");
                return Err(BridgeError::Timeout(ready_timeout));
            }
            tokio::time::sleep(ctx.config.ready_poll()).await;
        }

        if let Some(source) = &ctx.bootstrap
            && let Err(e) = transport.inject(&target, source).await
        {
            warn!(session_id = %ctx.session_id, error = %e, "RecreateSurfaceStrategy: bootstrap injection failed");
            return Ok(false);
        }

        info!(session_id = %ctx.session_id, %target, "Surface recreated");
        Ok(true)
    }
}
