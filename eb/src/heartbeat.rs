//! Heartbeat monitor
//!
//! One periodic timer probes every session. Each tick:
//! - a session silent beyond its `timeout` is destroyed
//! - an active session silent for two heartbeat periods is reported as
//!   `connection_lost`
//! - any other active session gets a heartbeat envelope (no queue, no report)

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, FailureReport};
use crate::domain::SessionStatus;
use crate::error::FailureKind;

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Heartbeats sent
    pub probed: usize,
    /// Sessions reported as `connection_lost`
    pub flagged: usize,
    /// Sessions destroyed for exceeding their timeout
    pub evicted: usize,
}

pub struct HeartbeatMonitor {
    dispatcher: Dispatcher,
    failures: mpsc::UnboundedSender<FailureReport>,
    period: Duration,
}

impl HeartbeatMonitor {
    pub fn new(dispatcher: Dispatcher, failures: mpsc::UnboundedSender<FailureReport>, period: Duration) -> Self {
        Self {
            dispatcher,
            failures,
            period,
        }
    }

    /// Run one probe pass over every session
    pub async fn tick_once(&self) -> TickReport {
        let mut report = TickReport::default();
        let registry = self.dispatcher.registry();
        let sessions = match registry.list().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "HeartbeatMonitor::tick_once: registry unavailable");
                return report;
            }
        };

        for session in sessions {
            let idle = session.last_activity.elapsed();

            if idle > session.config.timeout() {
                info!(session_id = %session.id, idle_ms = idle.as_millis() as u64, "Session expired, removing");
                if let Ok(true) = registry.destroy_if_idle(&session.id, "timeout").await {
                    report.evicted += 1;
                }
                continue;
            }

            if session.status != SessionStatus::Active {
                continue;
            }

            if idle > session.config.liveness_window() {
                debug!(session_id = %session.id, idle_ms = idle.as_millis() as u64, "HeartbeatMonitor: connection lost");
                let failure = FailureReport {
                    session_id: session.id.clone(),
                    kind: FailureKind::ConnectionLost,
                    detail: format!("no activity for {}ms", idle.as_millis()),
                    observed_activity: Some(session.last_activity),
                };
                if self.failures.send(failure).is_err() {
                    debug!("HeartbeatMonitor: recovery channel closed");
                }
                report.flagged += 1;
                continue;
            }

            let dispatcher = self.dispatcher.clone();
            let session_id = session.id.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatcher.send_heartbeat(&session_id).await {
                    debug!(%session_id, error = %e, "HeartbeatMonitor: heartbeat skipped");
                }
            });
            report.probed += 1;
        }

        debug!(?report, "HeartbeatMonitor::tick_once: done");
        report
    }

    /// Tick until a shutdown signal arrives
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        if self.period.is_zero() {
            warn!("HeartbeatMonitor: zero period, not starting");
            return;
        }
        info!(period_ms = self.period.as_millis() as u64, "HeartbeatMonitor started");
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_once().await;
                }
                _ = shutdown_rx.recv() => {
                    debug!("HeartbeatMonitor: shutdown signal received");
                    break;
                }
            }
        }

        info!("HeartbeatMonitor stopped");
    }

    /// Start the monitor on its own task
    pub fn spawn(self) -> HeartbeatHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        HeartbeatHandle { shutdown_tx, task }
    }
}

/// Running heartbeat timer
pub struct HeartbeatHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop the timer and wait for the task to end
    pub async fn stop(self) {
        debug!("HeartbeatHandle::stop: called");
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "HeartbeatHandle::stop: task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
