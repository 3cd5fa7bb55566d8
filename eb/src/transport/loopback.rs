//! In-process transport
//!
//! Surfaces are plain records in a map. Each surface has a scripted
//! [`SurfaceMode`] so the simulator and tests can drive every failure path.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::TransportAdapter;
use crate::domain::{Envelope, SurfaceParams, SurfaceRef};
use crate::error::TransportError;

/// How a loopback surface answers sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceMode {
    /// Acknowledge every envelope
    Accept,
    /// Answer without acknowledging
    Reject,
    /// Fail with the given error
    Fail(TransportError),
    /// Never answer
    Hang,
}

#[derive(Debug)]
struct SurfaceState {
    mode: SurfaceMode,
    alive: bool,
    url: Option<String>,
    received: Vec<Envelope>,
    injected: Vec<String>,
}

impl SurfaceState {
    fn new(url: Option<String>) -> Self {
        Self {
            mode: SurfaceMode::Accept,
            alive: true,
            url,
            received: Vec::new(),
            injected: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct LoopbackState {
    surfaces: HashMap<SurfaceRef, SurfaceState>,
    recreate_blocked: Option<String>,
    fail_rate: f64,
    latency: Duration,
    send_calls: usize,
    recreate_calls: usize,
    next_surface: u64,
}

/// Transport whose surfaces live in memory
///
/// Unknown surfaces are created on first use in `Accept` mode.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LoopbackState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn with_surface<R>(&self, target: &SurfaceRef, f: impl FnOnce(&mut SurfaceState) -> R) -> R {
        self.with_state(|state| {
            let surface = state
                .surfaces
                .entry(target.clone())
                .or_insert_with(|| SurfaceState::new(None));
            f(surface)
        })
    }

    /// Register a surface up front
    pub fn open_surface(&self, target: impl Into<SurfaceRef>) -> SurfaceRef {
        let target = target.into();
        debug!(%target, "LoopbackTransport::open_surface: called");
        self.with_surface(&target, |s| s.alive = true);
        target
    }

    pub fn set_mode(&self, target: &SurfaceRef, mode: SurfaceMode) {
        debug!(%target, ?mode, "LoopbackTransport::set_mode: called");
        self.with_surface(target, |s| s.mode = mode);
    }

    /// Mark a surface as gone; sends fail with `SurfaceClosed`
    pub fn close_surface(&self, target: &SurfaceRef) {
        debug!(%target, "LoopbackTransport::close_surface: called");
        self.with_surface(target, |s| s.alive = false);
    }

    pub fn revive_surface(&self, target: &SurfaceRef) {
        self.with_surface(target, |s| s.alive = true);
    }

    /// Make `recreate` fail with `PermissionDenied`
    pub fn block_recreate(&self, message: impl Into<String>) {
        let message = message.into();
        self.with_state(|state| state.recreate_blocked = Some(message));
    }

    pub fn unblock_recreate(&self) {
        self.with_state(|state| state.recreate_blocked = None);
    }

    /// Probability in [0, 1] that an otherwise accepted send fails
    pub fn set_fail_rate(&self, rate: f64) {
        self.with_state(|state| state.fail_rate = rate.clamp(0.0, 1.0));
    }

    /// Delay applied to every send
    pub fn set_latency(&self, latency: Duration) {
        self.with_state(|state| state.latency = latency);
    }

    /// Envelopes acknowledged by `target`, in delivery order
    pub fn received(&self, target: &SurfaceRef) -> Vec<Envelope> {
        self.with_state(|state| {
            state
                .surfaces
                .get(target)
                .map(|s| s.received.clone())
                .unwrap_or_default()
        })
    }

    pub fn injected(&self, target: &SurfaceRef) -> Vec<String> {
        self.with_state(|state| {
            state
                .surfaces
                .get(target)
                .map(|s| s.injected.clone())
                .unwrap_or_default()
        })
    }

    pub fn surface_url(&self, target: &SurfaceRef) -> Option<String> {
        self.with_state(|state| state.surfaces.get(target).and_then(|s| s.url.clone()))
    }

    /// Number of `send` calls, including failed ones
    pub fn send_calls(&self) -> usize {
        self.with_state(|state| state.send_calls)
    }

    pub fn recreate_calls(&self) -> usize {
        self.with_state(|state| state.recreate_calls)
    }
}

#[async_trait]
impl TransportAdapter for LoopbackTransport {
    async fn send(&self, target: &SurfaceRef, envelope: &Envelope) -> Result<bool, TransportError> {
        debug!(%target, envelope_id = %envelope.id, event_name = %envelope.event_name, "LoopbackTransport::send: called");
        let (mode, alive, latency, fail_rate) = self.with_state(|state| {
            state.send_calls += 1;
            let latency = state.latency;
            let fail_rate = state.fail_rate;
            let surface = state
                .surfaces
                .entry(target.clone())
                .or_insert_with(|| SurfaceState::new(None));
            (surface.mode.clone(), surface.alive, latency, fail_rate)
        });

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !alive {
            return Err(TransportError::SurfaceClosed);
        }

        match mode {
            SurfaceMode::Accept => {
                if fail_rate > 0.0 && rand::random::<f64>() < fail_rate {
                    debug!(%target, "LoopbackTransport::send: simulated failure");
                    return Err(TransportError::Disconnected("simulated drop".to_string()));
                }
                self.with_surface(target, |s| s.received.push(envelope.clone()));
                Ok(true)
            }
            SurfaceMode::Reject => Ok(false),
            SurfaceMode::Fail(err) => Err(err),
            SurfaceMode::Hang => {
                std::future::pending::<()>().await;
                Ok(false)
            }
        }
    }

    async fn is_alive(&self, target: &SurfaceRef) -> bool {
        self.with_state(|state| state.surfaces.get(target).is_none_or(|s| s.alive))
    }

    async fn inject(&self, target: &SurfaceRef, source: &str) -> Result<(), TransportError> {
        debug!(%target, len = source.len(), "LoopbackTransport::inject: called");
        self.with_surface(target, |s| {
            if !s.alive {
                return Err(TransportError::SurfaceClosed);
            }
            s.injected.push(source.to_string());
            Ok(())
        })
    }

    async fn recreate(&self, params: &SurfaceParams) -> Result<SurfaceRef, TransportError> {
        debug!(url = %params.url, "LoopbackTransport::recreate: called");
        self.with_state(|state| {
            state.recreate_calls += 1;
            if let Some(message) = &state.recreate_blocked {
                return Err(TransportError::PermissionDenied(message.clone()));
            }
            state.next_surface += 1;
            let target = SurfaceRef::new(format!("surface-{}", state.next_surface));
            state
                .surfaces
                .insert(target.clone(), SurfaceState::new(Some(params.url.clone())));
            Ok(target)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnvelopeKind;
    use serde_json::{Value, json};

    fn env() -> Envelope {
        Envelope::outbound(EnvelopeKind::Event, "s1", "x", json!({"a": 1}))
    }

    #[tokio::test]
    async fn test_accepts_by_default() {
        let transport = LoopbackTransport::new();
        let v1 = SurfaceRef::from("v1");
        assert!(transport.send(&v1, &env()).await.unwrap());
        assert_eq!(transport.received(&v1).len(), 1);
        assert_eq!(transport.send_calls(), 1);
        assert!(transport.is_alive(&v1).await);
    }

    #[tokio::test]
    async fn test_scripted_modes() {
        let transport = LoopbackTransport::new();
        let v1 = transport.open_surface("v1");

        transport.set_mode(&v1, SurfaceMode::Reject);
        assert!(!transport.send(&v1, &env()).await.unwrap());

        transport.set_mode(&v1, SurfaceMode::Fail(TransportError::PermissionDenied("no".to_string())));
        assert_eq!(
            transport.send(&v1, &env()).await.unwrap_err(),
            TransportError::PermissionDenied("no".to_string())
        );
        assert!(transport.received(&v1).is_empty());
    }

    #[tokio::test]
    async fn test_hang_never_resolves() {
        let transport = LoopbackTransport::new();
        let v1 = transport.open_surface("v1");
        transport.set_mode(&v1, SurfaceMode::Hang);

        let result = tokio::time::timeout(Duration::from_millis(20), transport.send(&v1, &env())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_closed_surface() {
        let transport = LoopbackTransport::new();
        let v1 = transport.open_surface("v1");
        transport.close_surface(&v1);

        assert!(!transport.is_alive(&v1).await);
        assert_eq!(transport.send(&v1, &env()).await.unwrap_err(), TransportError::SurfaceClosed);
        assert!(transport.inject(&v1, "x").await.is_err());

        transport.revive_surface(&v1);
        assert!(transport.inject(&v1, "window.bridge = {};").await.is_ok());
        assert_eq!(transport.injected(&v1), vec!["window.bridge = {};".to_string()]);
    }

    #[tokio::test]
    async fn test_recreate() {
        let transport = LoopbackTransport::new();
        let params = SurfaceParams {
            url: "app://legacy/index.html".to_string(),
            features: None,
        };

        let surface = transport.recreate(&params).await.unwrap();
        assert!(transport.is_alive(&surface).await);
        assert_eq!(transport.surface_url(&surface).as_deref(), Some("app://legacy/index.html"));

        transport.block_recreate("popup blocked");
        assert!(matches!(
            transport.recreate(&params).await,
            Err(TransportError::PermissionDenied(_))
        ));
        assert_eq!(transport.recreate_calls(), 2);
    }

    #[tokio::test]
    async fn test_full_fail_rate() {
        let transport = LoopbackTransport::new();
        transport.set_fail_rate(1.0);
        let v1 = SurfaceRef::from("v1");
        let envelope = Envelope::outbound(EnvelopeKind::Event, "s1", "x", Value::Null);
        assert!(matches!(
            transport.send(&v1, &envelope).await,
            Err(TransportError::Disconnected(_))
        ));
    }
}
