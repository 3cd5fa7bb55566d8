//! End-to-end behavior of the bridge against a loopback transport

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::json;
use tokio::sync::{Mutex, Notify, broadcast};

use eventbridge::config::{Config, RecoveryConfig, SessionConfig};
use eventbridge::domain::{Envelope, EnvelopeKind, Session, SessionOptions, SessionStatus, SurfaceParams, SurfaceRef};
use eventbridge::recovery::{RecoveryContext, RecoveryOutcome, RecoveryStrategy};
use eventbridge::transport::{LoopbackTransport, SurfaceMode};
use eventbridge::{Bridge, BridgeEvent, BridgeResult, FailureKind, FailureReport, SendOutcome, TransportError, Verdict};

fn fast_config() -> Config {
    Config {
        recovery: RecoveryConfig {
            backoff_base_ms: 10,
            backoff_cap_ms: 40,
            handshake_timeout_ms: 100,
            surface_ready_timeout_ms: 200,
            ready_poll_ms: 10,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn spawn_bridge(config: Config) -> (Bridge, Arc<LoopbackTransport>) {
    let transport = Arc::new(LoopbackTransport::new());
    let bridge = Bridge::builder(config, transport.clone()).spawn();
    (bridge, transport)
}

async fn wait_for(rx: &mut broadcast::Receiver<BridgeEvent>, name: &str) -> BridgeEvent {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let event = rx.recv().await.unwrap();
            if event.name() == name {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", name))
}

/// Strategy that counts calls, optionally pausing before answering
struct CountingStrategy {
    calls: AtomicU32,
    attempts_seen: Mutex<Vec<u32>>,
    delay: Duration,
    result: bool,
}

impl CountingStrategy {
    fn new(delay: Duration, result: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            attempts_seen: Mutex::new(Vec::new()),
            delay,
            result,
        })
    }
}

#[async_trait]
impl RecoveryStrategy for CountingStrategy {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn recover(&self, ctx: &RecoveryContext) -> BridgeResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempts_seen.lock().await.push(ctx.attempt);
        tokio::time::sleep(self.delay).await;
        Ok(self.result)
    }
}

/// Strategy that parks until released
struct GatedStrategy {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl RecoveryStrategy for GatedStrategy {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn recover(&self, _ctx: &RecoveryContext) -> BridgeResult<bool> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(true)
    }
}

#[tokio::test]
async fn test_session_readable_until_destroyed() {
    let (bridge, _transport) = spawn_bridge(Config::default());
    let info = bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();

    for _ in 0..3 {
        assert!(bridge.get_session(&info.id).await.unwrap().is_some());
    }
    assert!(bridge.destroy_session(&info.id).await.unwrap());
    assert!(bridge.get_session(&info.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_session_removed_by_timeout_cleanup() {
    let config = Config {
        session: SessionConfig {
            timeout_ms: 30,
            ..Default::default()
        },
        ..Default::default()
    };
    let (bridge, _transport) = spawn_bridge(config);
    let mut rx = bridge.subscribe_events();
    let info = bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    let report = bridge.heartbeat_tick().await;
    assert_eq!(report.evicted, 1);
    assert!(bridge.get_session(&info.id).await.unwrap().is_none());

    match wait_for(&mut rx, "session-destroyed").await {
        BridgeEvent::SessionDestroyed { session_id, reason } => {
            assert_eq!(session_id, info.id);
            assert_eq!(reason, "timeout");
        }
        other => panic!("unexpected {:?}", other),
    }
}

proptest! {
    #[test]
    fn prop_pending_queue_is_bounded_fifo(cap in 0usize..12, pushes in 0usize..40) {
        let defaults = SessionConfig {
            max_queue_size: cap,
            ..Default::default()
        };
        let mut session = Session::new("s1", SurfaceRef::from("v1"), SessionOptions::default(), &defaults);

        let mut ids = Vec::new();
        for n in 0..pushes {
            let envelope = Envelope::outbound(EnvelopeKind::Event, "s1", "x", json!({ "n": n }));
            ids.push(envelope.id.clone());
            session.push_pending(envelope);
            prop_assert!(session.pending_len() <= cap);
        }

        let kept: Vec<String> = session.pending().map(|e| e.id.clone()).collect();
        let expected: Vec<String> = ids[pushes.saturating_sub(cap)..].to_vec();
        prop_assert_eq!(kept, expected);
    }
}

#[tokio::test]
async fn test_recovery_attempts_never_exceed_max_retries() {
    let (bridge, transport) = spawn_bridge(fast_config());
    let strategy = CountingStrategy::new(Duration::ZERO, false);
    bridge
        .recovery()
        .register_strategy(FailureKind::MessageSendFailed, strategy.clone());
    let mut rx = bridge.subscribe_events();

    let info = bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();
    transport.set_mode(
        &SurfaceRef::from("v1"),
        SurfaceMode::Fail(TransportError::Disconnected("pipe".to_string())),
    );

    let outcome = bridge.send_event(&info.id, "update", json!({})).await.unwrap();
    assert_eq!(outcome, SendOutcome::Queued(FailureKind::MessageSendFailed));

    match wait_for(&mut rx, "session-failed").await {
        BridgeEvent::SessionFailed { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected {:?}", other),
    }

    let max = bridge.config().recovery.max_retries;
    let seen = strategy.attempts_seen.lock().await.clone();
    assert_eq!(seen, vec![1, 2, 3]);
    assert!(seen.iter().all(|&a| a <= max));

    let session = bridge.get_session(&info.id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::PermanentlyFailed);
    assert_eq!(session.recovery_attempts, max);
}

#[tokio::test]
async fn test_broadcast_skips_permanently_failed() {
    let (bridge, _transport) = spawn_bridge(Config::default());
    let mut ids = Vec::new();
    for n in 0..5 {
        let info = bridge
            .create_session(SessionOptions::for_target(format!("v{}", n)))
            .await
            .unwrap();
        ids.push(info.id);
    }

    let registry = bridge.dispatcher().registry();
    for id in &ids[..2] {
        assert!(registry.mark_permanently_failed(id, "simulated").await.unwrap());
    }

    assert_eq!(bridge.broadcast_event("tick", json!({})).await, 3);
}

#[tokio::test]
async fn test_deny_prevents_transport_send() {
    let (bridge, transport) = spawn_bridge(Config::default());
    let info = bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();
    bridge.add_interceptor("secret", 0, eventbridge::interceptor_fn(|_| Ok(Verdict::Deny)));

    let outcome = bridge.send_event(&info.id, "secret", json!({"a": 1})).await.unwrap();
    assert!(!outcome.delivered());
    assert_eq!(outcome, SendOutcome::Denied);
    assert_eq!(transport.send_calls(), 0);
}

#[tokio::test]
async fn test_round_trip_advances_activity_and_emits_event_sent() {
    let (bridge, _transport) = spawn_bridge(Config::default());
    let mut rx = bridge.subscribe_events();
    let info = bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();
    let before = bridge.get_session(&info.id).await.unwrap().unwrap().last_activity;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let outcome = bridge.send_event(&info.id, "x", json!({"a": 1})).await.unwrap();
    assert!(outcome.delivered());

    let after = bridge.get_session(&info.id).await.unwrap().unwrap();
    assert!(after.last_activity > before);
    assert_eq!(after.sent_events, 1);

    match wait_for(&mut rx, "event-sent").await {
        BridgeEvent::EventSent { session_id, envelope } => {
            assert_eq!(session_id, info.id);
            assert_eq!(envelope.payload, json!({"a": 1}));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_heartbeat_flags_connection_lost_once_per_window() {
    let config = Config {
        session: SessionConfig {
            heartbeat_interval_ms: 100,
            ..Default::default()
        },
        ..fast_config()
    };
    let (bridge, transport) = spawn_bridge(config);
    let strategy = CountingStrategy::new(Duration::from_millis(400), true);
    bridge
        .recovery()
        .register_strategy(FailureKind::ConnectionLost, strategy.clone());

    bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();
    // Heartbeats go unacknowledged, so activity never advances
    transport.set_mode(&SurfaceRef::from("v1"), SurfaceMode::Reject);
    bridge.initialize().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);

    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_destroy_during_recovery_aborts() {
    let (bridge, _transport) = spawn_bridge(Config::default());
    let strategy = Arc::new(GatedStrategy {
        started: Notify::new(),
        release: Notify::new(),
    });
    bridge
        .recovery()
        .register_strategy(FailureKind::ConnectionLost, strategy.clone());
    let info = bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();

    let handle = bridge.recovery().handle_failure(FailureReport {
        session_id: info.id.clone(),
        kind: FailureKind::ConnectionLost,
        detail: "test".to_string(),
        observed_activity: None,
    });

    strategy.started.notified().await;
    assert!(bridge.destroy_session(&info.id).await.unwrap());
    strategy.release.notify_one();

    assert_eq!(handle.await.unwrap(), RecoveryOutcome::Aborted);
    assert!(bridge.get_session(&info.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_closed_surface_is_recreated_and_queue_flushed() {
    let (bridge, transport) = {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = Bridge::builder(fast_config(), transport.clone())
            .bootstrap("window.bridge = {};")
            .spawn();
        (bridge, transport)
    };
    let mut rx = bridge.subscribe_events();
    let info = bridge
        .create_session(SessionOptions::for_target("v1").with_creation(SurfaceParams {
            url: "legacy://index.html".to_string(),
            features: None,
        }))
        .await
        .unwrap();

    transport.close_surface(&SurfaceRef::from("v1"));
    let outcome = bridge.send_event(&info.id, "update", json!({"n": 1})).await.unwrap();
    assert_eq!(outcome, SendOutcome::Queued(FailureKind::SurfaceClosed));

    match wait_for(&mut rx, "session-recovered").await {
        BridgeEvent::SessionRecovered { attempts, .. } => assert_eq!(attempts, 1),
        other => panic!("unexpected {:?}", other),
    }

    let session = bridge.get_session(&info.id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_ne!(session.target, SurfaceRef::from("v1"));
    assert_eq!(transport.injected(&session.target), vec!["window.bridge = {};".to_string()]);

    // The flush runs right after the recovered event
    tokio::time::sleep(Duration::from_millis(20)).await;
    let names: Vec<String> = transport
        .received(&session.target)
        .into_iter()
        .map(|e| e.event_name)
        .collect();
    assert!(names.contains(&"update".to_string()));
}

#[tokio::test]
async fn test_blocked_recreation_requires_user_action() {
    let (bridge, transport) = spawn_bridge(fast_config());
    let mut rx = bridge.subscribe_events();
    let info = bridge
        .create_session(SessionOptions::for_target("v1").with_creation(SurfaceParams {
            url: "legacy://index.html".to_string(),
            features: None,
        }))
        .await
        .unwrap();

    transport.block_recreate("popup blocked");
    transport.close_surface(&SurfaceRef::from("v1"));
    bridge.send_event(&info.id, "update", json!({})).await.unwrap();

    match wait_for(&mut rx, "permission-required").await {
        BridgeEvent::PermissionRequired { session_id, message } => {
            assert_eq!(session_id, info.id);
            assert!(message.contains("popup blocked"));
        }
        other => panic!("unexpected {:?}", other),
    }
    let session = bridge.get_session(&info.id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::PermanentlyFailed);
}

#[tokio::test]
async fn test_inbound_events_reach_subscribers() {
    let (bridge, _transport) = spawn_bridge(Config::default());
    let mut rx = bridge.subscribe_events();
    let info = bridge.create_session(SessionOptions::for_target("v1")).await.unwrap();
    bridge.subscribe(&info.id, "legacy:saved", "panel-1").await.unwrap();
    bridge.subscribe(&info.id, "legacy:saved", "panel-2").await.unwrap();

    let notified = bridge
        .receive_inbound(&info.id, "legacy:saved", json!({"doc": 7}))
        .await
        .unwrap();
    assert_eq!(notified, 2);

    match wait_for(&mut rx, "subscriber-notified").await {
        BridgeEvent::SubscriberNotified { event_name, data, .. } => {
            assert_eq!(event_name, "legacy:saved");
            assert_eq!(data, json!({"doc": 7}));
        }
        other => panic!("unexpected {:?}", other),
    }
}
