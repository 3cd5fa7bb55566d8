//! Recovery coordinator
//!
//! Maps failure classifications to strategies and drives the session state
//! machine: `active -> failed -> reconnecting -> active`, or back to `failed`
//! with linear backoff until the retry budget runs out.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::policy::RetryPolicy;
use super::strategy::{
    RecoveryContext, RecoveryStrategy, ReconnectStrategy, RecreateSurfaceStrategy, ReplayStrategy,
};
use crate::config::RecoveryConfig;
use crate::dispatch::{Dispatcher, FailureReport};
use crate::error::{BridgeError, FailureKind};
use crate::events::{BridgeEvent, EventBus};
use crate::registry::{AttemptEnd, AttemptStart, RecoveryGate};

/// How a recovery run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Recovered { attempts: u32 },
    PermanentlyFailed,
    /// Escalated to the host; the session is permanently failed
    UserActionRequired,
    /// The session disappeared mid-recovery
    Aborted,
    /// Another recovery owns the session, or the report was stale
    Skipped,
}

struct CoordinatorInner {
    dispatcher: Dispatcher,
    bus: Arc<EventBus>,
    config: RecoveryConfig,
    policy: RetryPolicy,
    strategies: RwLock<HashMap<FailureKind, Arc<dyn RecoveryStrategy>>>,
    bootstrap: RwLock<Option<Arc<str>>>,
}

/// Runs recoveries; cheap to clone
#[derive(Clone)]
pub struct RecoveryCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl RecoveryCoordinator {
    /// Create a coordinator with the built-in strategies
    pub fn new(dispatcher: Dispatcher, bus: Arc<EventBus>, config: RecoveryConfig) -> Self {
        let replay: Arc<dyn RecoveryStrategy> = Arc::new(ReplayStrategy);
        let mut strategies: HashMap<FailureKind, Arc<dyn RecoveryStrategy>> = HashMap::new();
        strategies.insert(FailureKind::ConnectionLost, Arc::new(ReconnectStrategy));
        strategies.insert(FailureKind::MessageTimeout, replay.clone());
        strategies.insert(FailureKind::MessageSendFailed, replay);
        strategies.insert(FailureKind::SurfaceClosed, Arc::new(RecreateSurfaceStrategy));

        Self {
            inner: Arc::new(CoordinatorInner {
                dispatcher,
                bus,
                policy: RetryPolicy::from(&config),
                config,
                strategies: RwLock::new(strategies),
                bootstrap: RwLock::new(None),
            }),
        }
    }

    /// Replace the strategy used for `kind`
    pub fn register_strategy(&self, kind: FailureKind, strategy: Arc<dyn RecoveryStrategy>) {
        debug!(%kind, strategy = strategy.name(), "RecoveryCoordinator::register_strategy: called");
        self.inner
            .strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, strategy);
    }

    /// Script injected into recreated surfaces
    pub fn set_bootstrap(&self, source: Option<String>) {
        *self.inner.bootstrap.write().unwrap_or_else(PoisonError::into_inner) = source.map(Arc::from);
    }

    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    /// Consume failure reports until every sender is gone
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<FailureReport>) {
        info!("RecoveryCoordinator started");
        while let Some(report) = rx.recv().await {
            self.handle_failure(report);
        }
        info!("RecoveryCoordinator stopped");
    }

    /// Start recovery for a report on its own task
    pub fn handle_failure(&self, report: FailureReport) -> JoinHandle<RecoveryOutcome> {
        debug!(session_id = %report.session_id, kind = %report.kind, "RecoveryCoordinator::handle_failure: called");
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.recover(report).await })
    }

    /// Run a recovery to completion on the current task
    pub async fn recover(&self, report: FailureReport) -> RecoveryOutcome {
        let id = report.session_id.as_str();
        let registry = self.inner.dispatcher.registry();

        match registry.begin_recovery(id, report.observed_activity).await {
            Ok(RecoveryGate::Proceed) => {}
            Ok(RecoveryGate::Missing) | Err(_) => return RecoveryOutcome::Aborted,
            Ok(gate) => {
                debug!(session_id = %id, ?gate, "RecoveryCoordinator::recover: skipped");
                return RecoveryOutcome::Skipped;
            }
        }

        info!(session_id = %id, kind = %report.kind, detail = %report.detail, "Recovery started");

        if !report.kind.is_recoverable() {
            return self.escalate(id, &report.detail).await;
        }
        self.drive(id, report.kind).await
    }

    async fn drive(&self, id: &str, kind: FailureKind) -> RecoveryOutcome {
        let registry = self.inner.dispatcher.registry();
        let max_retries = self.inner.policy.max_retries;

        let strategy = self
            .inner
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned();
        let Some(strategy) = strategy else {
            warn!(session_id = %id, %kind, "RecoveryCoordinator: no strategy registered");
            return match registry.mark_permanently_failed(id, "no recovery strategy").await {
                Ok(true) => RecoveryOutcome::PermanentlyFailed,
                _ => RecoveryOutcome::Aborted,
            };
        };

        loop {
            let attempt = match registry.start_attempt(id, max_retries).await {
                Ok(AttemptStart::Started(attempt)) => attempt,
                Ok(AttemptStart::Exhausted) => return RecoveryOutcome::PermanentlyFailed,
                Ok(AttemptStart::Missing) | Err(_) => return RecoveryOutcome::Aborted,
            };
            debug!(session_id = %id, attempt, strategy = strategy.name(), "RecoveryCoordinator: attempt started");

            let ctx = RecoveryContext {
                session_id: id.to_string(),
                kind,
                attempt,
                dispatcher: self.inner.dispatcher.clone(),
                config: self.inner.config.clone(),
                bootstrap: self.inner.bootstrap.read().unwrap_or_else(PoisonError::into_inner).clone(),
            };

            let success = match strategy.recover(&ctx).await {
                Ok(success) => success,
                Err(e) if e.requires_user_action() => return self.escalate(id, &e.to_string()).await,
                Err(BridgeError::SessionNotFound(_)) | Err(BridgeError::Channel) => {
                    debug!(session_id = %id, "RecoveryCoordinator: session gone during attempt");
                    return RecoveryOutcome::Aborted;
                }
                Err(e) if e.is_retryable() => {
                    warn!(session_id = %id, attempt, error = %e, "RecoveryCoordinator: attempt errored");
                    false
                }
                Err(e) => {
                    error!(session_id = %id, attempt, error = %e, "RecoveryCoordinator: unrecoverable error");
                    return match registry.mark_permanently_failed(id, &e.to_string()).await {
                        Ok(true) => RecoveryOutcome::PermanentlyFailed,
                        _ => RecoveryOutcome::Aborted,
                    };
                }
            };

            match registry.finish_attempt(id, success, max_retries).await {
                Ok(AttemptEnd::Recovered { pending }) => {
                    let flushed = self.inner.dispatcher.flush_pending(id, pending).await;
                    info!(session_id = %id, attempts = attempt, flushed, "Recovery succeeded");
                    return RecoveryOutcome::Recovered { attempts: attempt };
                }
                Ok(AttemptEnd::Retry(k)) => {
                    let delay = self.inner.policy.delay_for(k);
                    debug!(session_id = %id, attempt = k, ?delay, "RecoveryCoordinator: backing off");
                    tokio::time::sleep(delay).await;
                }
                Ok(AttemptEnd::PermanentlyFailed) => return RecoveryOutcome::PermanentlyFailed,
                Ok(AttemptEnd::Missing) | Err(_) => return RecoveryOutcome::Aborted,
            }
        }
    }

    /// Permanently fail the session and tell the host once
    async fn escalate(&self, id: &str, message: &str) -> RecoveryOutcome {
        warn!(session_id = %id, %message, "Recovery requires user action");
        match self
            .inner
            .dispatcher
            .registry()
            .mark_permanently_failed(id, message)
            .await
        {
            Ok(true) => {
                self.inner.bus.emit(BridgeEvent::PermissionRequired {
                    session_id: id.to_string(),
                    message: message.to_string(),
                });
                RecoveryOutcome::UserActionRequired
            }
            _ => RecoveryOutcome::Aborted,
        }
    }
}
