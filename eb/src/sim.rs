//! In-process simulation
//!
//! Spins up a bridge on a [`LoopbackTransport`], opens sessions, pushes
//! events through a lossy surface and waits for recovery to settle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::bridge::Bridge;
use crate::config::{Config, DispatchConfig, RecoveryConfig, SessionConfig};
use crate::dispatch::SendOutcome;
use crate::domain::{SessionOptions, SessionStatus, SurfaceParams, SurfaceRef};
use crate::error::BridgeResult;
use crate::transport::LoopbackTransport;

/// Knobs for one simulation run
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub sessions: usize,
    pub events_per_session: usize,
    /// Probability that the surface drops a send
    pub fail_rate: f64,
    /// Close the first session's surface mid-run
    pub close_surface: bool,
    pub settle_timeout: Duration,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            sessions: 3,
            events_per_session: 10,
            fail_rate: 0.2,
            close_surface: false,
            settle_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulatedSession {
    pub id: String,
    pub target: SurfaceRef,
    pub status: SessionStatus,
    pub sent_events: u64,
    pub pending: usize,
    pub recovery_attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    pub sessions: Vec<SimulatedSession>,
    pub sent: usize,
    pub delivered: usize,
    pub queued: usize,
    pub failed: usize,
    pub recovered: usize,
    pub permanently_failed: usize,
    pub settled: bool,
    pub elapsed_ms: u64,
}

/// Timings short enough for an interactive run
pub fn simulation_config() -> Config {
    Config {
        session: SessionConfig {
            heartbeat_interval_ms: 200,
            timeout_ms: 60_000,
            persistence: false,
            ..Default::default()
        },
        recovery: RecoveryConfig {
            backoff_base_ms: 50,
            backoff_cap_ms: 200,
            handshake_timeout_ms: 200,
            surface_ready_timeout_ms: 500,
            ready_poll_ms: 20,
            ..Default::default()
        },
        dispatch: DispatchConfig {
            send_timeout_ms: 200,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Run one simulation to completion
pub async fn run_simulation(options: SimulationOptions) -> BridgeResult<SimulationReport> {
    info!(?options, "Simulation starting");
    let started = Instant::now();
    let transport = Arc::new(LoopbackTransport::new());
    let bridge = Bridge::builder(simulation_config(), transport.clone()).spawn();

    let recovered = Arc::new(AtomicUsize::new(0));
    let counter = recovered.clone();
    bridge.on("session-recovered", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    bridge.initialize().await?;

    let mut ids = Vec::with_capacity(options.sessions);
    for n in 0..options.sessions {
        let target = transport.open_surface(format!("view-{}", n + 1));
        let params = SurfaceParams {
            url: format!("legacy://module-{}", n + 1),
            features: None,
        };
        let info = bridge
            .create_session(
                SessionOptions::for_target(target)
                    .with_module(format!("module-{}", n + 1))
                    .with_creation(params),
            )
            .await?;
        ids.push(info.id);
    }

    let mut report = SimulationReport::default();
    transport.set_fail_rate(options.fail_rate);

    for seq in 0..options.events_per_session {
        if options.close_surface
            && seq == options.events_per_session / 2
            && let Some(first) = ids.first()
            && let Some(info) = bridge.get_session(first).await?
        {
            debug!(session_id = %first, "Simulation: closing surface");
            transport.close_surface(&info.target);
        }

        for id in &ids {
            report.sent += 1;
            match bridge.send_event(id, "sim:update", json!({ "seq": seq })).await {
                Ok(SendOutcome::Delivered) => report.delivered += 1,
                Ok(SendOutcome::Queued(_)) => report.queued += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    debug!(session_id = %id, error = %e, "Simulation: send rejected");
                    report.failed += 1;
                }
            }
        }
    }

    transport.set_fail_rate(0.0);
    report.settled = settle(&bridge, options.settle_timeout).await?;

    for info in bridge.get_all_sessions().await? {
        if info.status == SessionStatus::PermanentlyFailed {
            report.permanently_failed += 1;
        }
        report.sessions.push(SimulatedSession {
            id: info.id,
            target: info.target,
            status: info.status,
            sent_events: info.sent_events,
            pending: info.pending_count,
            recovery_attempts: info.recovery_attempts,
        });
    }
    report.sessions.sort_by(|a, b| a.id.cmp(&b.id));
    report.recovered = recovered.load(Ordering::SeqCst);
    report.elapsed_ms = started.elapsed().as_millis() as u64;

    bridge.shutdown().await?;
    info!(
        sent = report.sent,
        delivered = report.delivered,
        recovered = report.recovered,
        "Simulation finished"
    );
    Ok(report)
}

/// Wait until no session is mid-recovery or holding queued events
async fn settle(bridge: &Bridge, timeout: Duration) -> BridgeResult<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let sessions = bridge.get_all_sessions().await?;
        let busy = sessions.iter().any(|s| match s.status {
            SessionStatus::Failed | SessionStatus::Reconnecting => true,
            SessionStatus::Active => s.pending_count > 0,
            _ => false,
        });
        if !busy {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lossless_run_delivers_everything() {
        let report = run_simulation(SimulationOptions {
            sessions: 2,
            events_per_session: 5,
            fail_rate: 0.0,
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(report.sent, 10);
        assert_eq!(report.delivered, 10);
        assert!(report.settled);
        assert_eq!(report.sessions.len(), 2);
        assert!(report.sessions.iter().all(|s| s.status == SessionStatus::Active));
    }

    #[tokio::test]
    async fn test_closed_surface_is_recreated() {
        let report = run_simulation(SimulationOptions {
            sessions: 1,
            events_per_session: 4,
            fail_rate: 0.0,
            close_surface: true,
            ..Default::default()
        })
        .await
        .unwrap();

        assert!(report.settled);
        assert!(report.recovered >= 1);
        let session = &report.sessions[0];
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.target.as_str().starts_with("surface-"));
    }
}
