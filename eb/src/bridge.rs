//! Bridge façade
//!
//! [`Bridge`] wires the registry, dispatcher, heartbeat monitor and recovery
//! coordinator together and exposes the host-facing operations.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::{Dispatcher, FailureReport, SendOutcome};
use crate::domain::{Envelope, SessionInfo, SessionOptions, SurfaceRef, SyncedValue};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, EventBus, ObserverId};
use crate::heartbeat::{HeartbeatHandle, HeartbeatMonitor, TickReport};
use crate::interceptor::{Interceptor, InterceptorChain, InterceptorId};
use crate::persistence::{PersistedSession, SessionStore};
use crate::recovery::RecoveryCoordinator;
use crate::registry::{RegistryHandle, SessionRegistry};
use crate::transport::TransportAdapter;

/// Destroy reason used by `shutdown`; persisted records survive it
pub const SHUTDOWN_REASON: &str = "shutdown";

/// Snapshot returned by [`Bridge::stats`]
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub active_sessions: usize,
    pub total_sessions: usize,
    pub reconnecting: usize,
    pub failed: usize,
    pub permanently_failed: usize,
    pub total_subscribers: usize,
    pub queued_events: usize,
    pub recovery_attempts: u64,
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
    pub interceptors: usize,
    pub heartbeat_running: bool,
    pub uptime_ms: u64,
}

/// Builder for [`Bridge`]
pub struct BridgeBuilder {
    config: Config,
    transport: Arc<dyn TransportAdapter>,
    store: Option<SessionStore>,
    bootstrap: Option<String>,
}

impl BridgeBuilder {
    /// Persist session metadata in `store`
    pub fn store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Source injected into surfaces on `surface_ready` and after recreation
    pub fn bootstrap(mut self, source: impl Into<String>) -> Self {
        self.bootstrap = Some(source.into());
        self
    }

    /// Start the registry and recovery tasks; needs a Tokio runtime
    pub fn spawn(self) -> Bridge {
        let Self {
            config,
            transport,
            store,
            bootstrap,
        } = self;
        debug!(persistence = store.is_some(), "BridgeBuilder::spawn: called");

        let bus = Arc::new(EventBus::new(config.dispatch.event_channel_capacity));
        let registry = SessionRegistry::spawn(
            config.session.clone(),
            bus.clone(),
            config.dispatch.registry_channel_buffer,
        );
        let interceptors = Arc::new(RwLock::new(InterceptorChain::new()));
        let (failures_tx, failures_rx) = mpsc::unbounded_channel::<FailureReport>();

        let dispatcher = Dispatcher::new(
            registry.clone(),
            transport,
            interceptors.clone(),
            bus.clone(),
            failures_tx.clone(),
            config.dispatch.send_timeout(),
        );

        let recovery = RecoveryCoordinator::new(dispatcher.clone(), bus.clone(), config.recovery.clone());
        recovery.set_bootstrap(bootstrap.clone());
        let recovery_task = tokio::spawn(recovery.clone().run(failures_rx));

        if let Some(store) = &store {
            let store = store.clone();
            bus.on("session-destroyed", move |event| {
                if let BridgeEvent::SessionDestroyed { session_id, reason } = event
                    && reason != SHUTDOWN_REASON
                    && let Err(e) = store.remove(session_id)
                {
                    warn!(%session_id, error = %e, "Failed to remove persisted session");
                }
            });
        }

        info!("Bridge spawned");
        Bridge {
            inner: Arc::new(BridgeInner {
                config,
                bus,
                registry,
                dispatcher,
                interceptors,
                recovery,
                recovery_task: std::sync::Mutex::new(Some(recovery_task)),
                failures: failures_tx,
                heartbeat: Mutex::new(None),
                store,
                bootstrap: bootstrap.map(Arc::from),
                started: Instant::now(),
            }),
        }
    }
}

struct BridgeInner {
    config: Config,
    bus: Arc<EventBus>,
    registry: RegistryHandle,
    dispatcher: Dispatcher,
    interceptors: Arc<RwLock<InterceptorChain>>,
    recovery: RecoveryCoordinator,
    recovery_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    failures: mpsc::UnboundedSender<FailureReport>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
    store: Option<SessionStore>,
    bootstrap: Option<Arc<str>>,
    started: Instant,
}

/// Host-facing event bridge; cheap to clone
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn builder(config: Config, transport: Arc<dyn TransportAdapter>) -> BridgeBuilder {
        BridgeBuilder {
            config,
            transport,
            store: None,
            bootstrap: None,
        }
    }

    /// Restore persisted sessions, then start the heartbeat
    ///
    /// Returns the number of sessions restored.
    pub async fn initialize(&self) -> BridgeResult<usize> {
        debug!("Bridge::initialize: called");
        self.inner.config.validate()?;
        let restored = self.restore_sessions().await?;
        self.start_heartbeat().await;
        info!(restored, "Bridge initialized");
        Ok(restored)
    }

    async fn restore_sessions(&self) -> BridgeResult<usize> {
        let Some(store) = &self.inner.store else {
            return Ok(0);
        };
        if !self.inner.config.session.persistence {
            return Ok(0);
        }

        let mut restored = 0;
        for record in store.load_all()? {
            match self.inner.registry.create(record.to_options()).await {
                Ok(_) => restored += 1,
                Err(BridgeError::Channel) => return Err(BridgeError::Channel),
                Err(e) => warn!(session_id = %record.id, error = %e, "Bridge: could not restore session"),
            }
        }
        Ok(restored)
    }

    /// Start the shared heartbeat timer; no-op when already running
    pub async fn start_heartbeat(&self) {
        let mut heartbeat = self.inner.heartbeat.lock().await;
        if heartbeat.as_ref().is_some_and(HeartbeatHandle::is_running) {
            debug!("Bridge::start_heartbeat: already running");
            return;
        }
        let monitor = HeartbeatMonitor::new(
            self.inner.dispatcher.clone(),
            self.inner.failures.clone(),
            self.inner.config.session.heartbeat_interval(),
        );
        *heartbeat = Some(monitor.spawn());
    }

    pub async fn stop_heartbeat(&self) {
        if let Some(handle) = self.inner.heartbeat.lock().await.take() {
            handle.stop().await;
        }
    }

    /// Run one heartbeat pass now
    pub async fn heartbeat_tick(&self) -> TickReport {
        HeartbeatMonitor::new(
            self.inner.dispatcher.clone(),
            self.inner.failures.clone(),
            self.inner.config.session.heartbeat_interval(),
        )
        .tick_once()
        .await
    }

    // === Sessions ===

    pub async fn create_session(&self, options: SessionOptions) -> BridgeResult<SessionInfo> {
        debug!(session_id = ?options.session_id, "Bridge::create_session: called");
        let info = self.inner.registry.create(options).await?;

        if info.config.persistence
            && let Some(store) = &self.inner.store
            && let Err(e) = store.save(&PersistedSession::from(&info))
        {
            warn!(session_id = %info.id, error = %e, "Failed to persist session");
        }
        Ok(info)
    }

    pub async fn destroy_session(&self, session_id: &str) -> BridgeResult<bool> {
        debug!(%session_id, "Bridge::destroy_session: called");
        self.inner.registry.destroy(session_id, "destroyed").await
    }

    pub async fn get_session(&self, session_id: &str) -> BridgeResult<Option<SessionInfo>> {
        self.inner.registry.get(session_id).await
    }

    pub async fn get_all_sessions(&self) -> BridgeResult<Vec<SessionInfo>> {
        self.inner.registry.list().await
    }

    // === Traffic ===

    pub async fn send_event(&self, session_id: &str, event_name: &str, data: Value) -> BridgeResult<SendOutcome> {
        self.inner.dispatcher.send_event(session_id, event_name, data).await
    }

    /// Send to every active session; returns how many accepted it
    pub async fn broadcast_event(&self, event_name: &str, data: Value) -> usize {
        self.inner.dispatcher.broadcast_event(event_name, data).await
    }

    pub async fn execute_command(&self, session_id: &str, command: &str, args: Value) -> BridgeResult<SendOutcome> {
        self.inner.dispatcher.execute_command(session_id, command, args).await
    }

    pub async fn subscribe(&self, session_id: &str, event_name: &str, subscriber_id: &str) -> BridgeResult<bool> {
        self.inner.registry.subscribe(session_id, event_name, subscriber_id).await
    }

    pub async fn unsubscribe(&self, session_id: &str, event_name: &str, subscriber_id: &str) -> BridgeResult<bool> {
        self.inner.registry.unsubscribe(session_id, event_name, subscriber_id).await
    }

    /// Record a value under `key` and push it to the surface as `data:sync`
    pub async fn sync_data(&self, session_id: &str, key: &str, value: Value) -> BridgeResult<SendOutcome> {
        debug!(%session_id, %key, "Bridge::sync_data: called");
        let timestamp = chrono::Utc::now();
        self.inner
            .registry
            .store_data(
                session_id,
                key,
                SyncedValue {
                    value: value.clone(),
                    timestamp,
                    synced: true,
                },
            )
            .await?;

        let payload = json!({
            "key": key,
            "value": value,
            "timestamp": timestamp.timestamp_millis(),
        });
        self.inner.dispatcher.send_event(session_id, "data:sync", payload).await
    }

    /// Accept an event from a surface; returns how many subscribers were notified
    pub async fn receive_inbound(&self, session_id: &str, event_name: &str, data: Value) -> BridgeResult<usize> {
        debug!(%session_id, %event_name, "Bridge::receive_inbound: called");
        self.inner
            .registry
            .inbound(Envelope::inbound(session_id, event_name, data))
            .await
    }

    // === Surface hooks ===

    pub fn surface_loaded(&self, target: &SurfaceRef) {
        debug!(%target, "Bridge::surface_loaded: called");
        self.inner.bus.emit(BridgeEvent::BrowserViewLoaded { target: target.clone() });
    }

    /// Make `target` the default surface and inject the bootstrap source
    pub async fn surface_ready(&self, target: &SurfaceRef) -> BridgeResult<()> {
        debug!(%target, "Bridge::surface_ready: called");
        self.inner.registry.set_default_surface(Some(target.clone())).await?;

        if let Some(source) = &self.inner.bootstrap {
            self.inner.dispatcher.transport().inject(target, source).await?;
        }

        self.inner.bus.emit(BridgeEvent::BrowserViewReady { target: target.clone() });
        Ok(())
    }

    /// The surface's application finished booting: open its main session
    pub async fn app_ready(&self, target: &SurfaceRef) -> BridgeResult<SessionInfo> {
        debug!(%target, "Bridge::app_ready: called");
        let info = self
            .create_session(SessionOptions::for_target(target.clone()).with_module("main"))
            .await?;

        let payload = json!({
            "sessionId": info.id,
            "timestamp": chrono::Utc::now().timestamp_millis(),
            "config": {
                "features": { "events": true, "storage": true, "sync": true }
            }
        });
        let outcome = self.send_event(&info.id, "app:initialized", payload).await?;
        if !outcome.delivered() {
            warn!(session_id = %info.id, ?outcome, "app:initialized not delivered");
        }
        Ok(info)
    }

    // === Interceptors and observers ===

    pub fn add_interceptor(
        &self,
        event_name: &str,
        priority: i32,
        interceptor: Arc<dyn Interceptor>,
    ) -> InterceptorId {
        self.inner
            .interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(event_name, priority, interceptor)
    }

    pub fn remove_interceptor(&self, id: InterceptorId) -> bool {
        self.inner
            .interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn on<F>(&self, event_name: &str, observer: F) -> ObserverId
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(event_name, observer)
    }

    pub fn off(&self, id: ObserverId) -> bool {
        self.inner.bus.off(id)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.bus.subscribe()
    }

    // === Accessors ===

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn recovery(&self) -> &RecoveryCoordinator {
        &self.inner.recovery
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub async fn stats(&self) -> BridgeResult<BridgeStats> {
        let metrics = self.inner.registry.metrics().await?;
        let heartbeat_running = self
            .inner
            .heartbeat
            .lock()
            .await
            .as_ref()
            .is_some_and(HeartbeatHandle::is_running);
        let interceptors = self
            .inner
            .interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();

        Ok(BridgeStats {
            active_sessions: metrics.active,
            total_sessions: metrics.sessions,
            reconnecting: metrics.reconnecting,
            failed: metrics.failed,
            permanently_failed: metrics.permanently_failed,
            total_subscribers: metrics.total_subscribers,
            queued_events: metrics.queued_events,
            recovery_attempts: metrics.recovery_attempts,
            sessions_created: metrics.sessions_created,
            sessions_destroyed: metrics.sessions_destroyed,
            interceptors,
            heartbeat_running,
            uptime_ms: self.uptime().as_millis() as u64,
        })
    }

    /// Stop the heartbeat, destroy every session and stop the background tasks
    pub async fn shutdown(&self) -> BridgeResult<()> {
        info!("Bridge shutting down");
        self.stop_heartbeat().await;

        let destroyed = self.inner.registry.destroy_all(SHUTDOWN_REASON).await?;
        debug!(destroyed, "Bridge::shutdown: sessions destroyed");

        self.inner
            .interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        if let Some(task) = self
            .inner
            .recovery_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        self.inner.registry.shutdown().await?;
        info!("Bridge shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{Verdict, interceptor_fn};
    use crate::transport::LoopbackTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn bridge(transport: Arc<LoopbackTransport>) -> Bridge {
        Bridge::builder(Config::default(), transport).spawn()
    }

    #[tokio::test]
    async fn test_create_and_destroy() {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = bridge(transport);

        let info = bridge
            .create_session(SessionOptions::for_target("v1").with_module("billing"))
            .await
            .unwrap();
        assert!(info.id.starts_with("session-"));
        assert!(bridge.get_session(&info.id).await.unwrap().is_some());

        assert!(bridge.destroy_session(&info.id).await.unwrap());
        assert!(bridge.get_session(&info.id).await.unwrap().is_none());
        assert!(!bridge.destroy_session(&info.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_sync_data_stores_and_sends() {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = bridge(transport.clone());
        let info = bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();

        let outcome = bridge.sync_data(&info.id, "theme", json!("dark")).await.unwrap();
        assert_eq!(outcome, SendOutcome::Delivered);

        let session = bridge.get_session(&info.id).await.unwrap().unwrap();
        let stored = &session.data["theme"];
        assert_eq!(stored.value, json!("dark"));
        assert!(stored.synced);

        let received = transport.received(&SurfaceRef::from("v1"));
        assert_eq!(received.last().unwrap().event_name, "data:sync");
        assert_eq!(received.last().unwrap().payload["key"], "theme");
    }

    #[tokio::test]
    async fn test_surface_ready_sets_default_and_injects() {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = Bridge::builder(Config::default(), transport.clone())
            .bootstrap("window.bridge = {};")
            .spawn();
        let mut rx = bridge.subscribe_events();
        let target = SurfaceRef::from("v7");

        bridge.surface_loaded(&target);
        bridge.surface_ready(&target).await.unwrap();

        assert_eq!(transport.injected(&target), vec!["window.bridge = {};".to_string()]);
        assert_eq!(rx.recv().await.unwrap().name(), "browser-view-loaded");
        assert_eq!(rx.recv().await.unwrap().name(), "browser-view-ready");

        let info = bridge.create_session(SessionOptions::default()).await.unwrap();
        assert_eq!(info.target, target);
    }

    #[tokio::test]
    async fn test_app_ready_opens_main_session() {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = bridge(transport.clone());
        let target = SurfaceRef::from("v1");

        let info = bridge.app_ready(&target).await.unwrap();
        assert_eq!(info.module, "main");

        let received = transport.received(&target);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event_name, "app:initialized");
        assert_eq!(received[0].payload["sessionId"], json!(info.id));
    }

    #[tokio::test]
    async fn test_interceptor_add_remove() {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = bridge(transport.clone());
        let info = bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();

        let id = bridge.add_interceptor("blocked", 0, interceptor_fn(|_| Ok(Verdict::Deny)));
        assert_eq!(
            bridge.send_event(&info.id, "blocked", json!({})).await.unwrap(),
            SendOutcome::Denied
        );

        assert!(bridge.remove_interceptor(id));
        assert_eq!(
            bridge.send_event(&info.id, "blocked", json!({})).await.unwrap(),
            SendOutcome::Delivered
        );
    }

    #[tokio::test]
    async fn test_observers() {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = bridge(transport);
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let id = bridge.on("session-created", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();
        assert!(bridge.off(id));
        bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(LoopbackTransport::new());

        let first = Bridge::builder(Config::default(), transport.clone())
            .store(SessionStore::open(temp.path()).unwrap())
            .spawn();
        let kept = first
            .create_session(SessionOptions::for_target("v1").with_id("kept").with_module("billing"))
            .await
            .unwrap();
        let dropped = first
            .create_session(SessionOptions::for_target("v1").with_id("dropped"))
            .await
            .unwrap();
        first.destroy_session(&dropped.id).await.unwrap();
        first.shutdown().await.unwrap();

        let second = Bridge::builder(Config::default(), transport)
            .store(SessionStore::open(temp.path()).unwrap())
            .spawn();
        assert_eq!(second.initialize().await.unwrap(), 1);

        let restored = second.get_session(&kept.id).await.unwrap().unwrap();
        assert_eq!(restored.module, "billing");
        assert_eq!(restored.pending_count, 0);
        assert!(second.get_session("dropped").await.unwrap().is_none());
        second.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_and_shutdown() {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = bridge(transport);
        let info = bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();
        bridge.subscribe(&info.id, "update", "sub-1").await.unwrap();
        bridge.initialize().await.unwrap();

        let stats = bridge.stats().await.unwrap();
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.total_subscribers, 1);
        assert!(stats.heartbeat_running);

        bridge.shutdown().await.unwrap();
        assert!(matches!(bridge.get_all_sessions().await, Err(BridgeError::Channel)));
    }

    #[tokio::test]
    async fn test_initialize_rejects_zero_heartbeat() {
        let mut config = Config::default();
        config.session.heartbeat_interval_ms = 0;
        let bridge = Bridge::builder(config, Arc::new(LoopbackTransport::new())).spawn();

        let err = bridge.initialize().await.unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));

        bridge.start_heartbeat().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!bridge.stats().await.unwrap().heartbeat_running);
        bridge.shutdown().await.unwrap();
    }
}
