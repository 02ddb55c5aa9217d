//! Integration tests: conductor lifecycle, routing, and outbound delivery
//! against the in-process relay, on a paused clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use streamkit_core::{
    Conductor, ConductorConfig, IceConnectionState, LocalRelay, OverflowPolicy, PeerId, PeerLink,
    PeerSession, PeerSessionContext, PeerSessionFactory, RtcConfig, StreamkitError,
};

// ── Helpers ──────────────────────────────────────────────────────

/// Echoes every inbound message back as `ack:<message>`.
struct EchoSession {
    peer_id: PeerId,
    link: PeerLink,
    dropped: Arc<AtomicUsize>,
}

impl PeerSession for EchoSession {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn handle_message(&self, message: &str) {
        let _ = self.link.send_message(format!("ack:{message}"));
    }
}

impl Drop for EchoSession {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct EchoFactory {
    created: AtomicUsize,
    dropped: Arc<AtomicUsize>,
    links: Mutex<HashMap<PeerId, PeerLink>>,
    names: Mutex<Vec<String>>,
}

impl EchoFactory {
    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    fn link(&self, peer_id: PeerId) -> PeerLink {
        self.links.lock()[&peer_id].clone()
    }
}

impl PeerSessionFactory for EchoFactory {
    fn create(&self, ctx: PeerSessionContext) -> Result<Arc<dyn PeerSession>, StreamkitError> {
        if ctx.name == "reject" {
            return Err(StreamkitError::Other("rejected".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.links.lock().insert(ctx.peer_id, ctx.link.clone());
        self.names.lock().push(ctx.name.clone());
        Ok(Arc::new(EchoSession {
            peer_id: ctx.peer_id,
            link: ctx.link,
            dropped: Arc::clone(&self.dropped),
        }))
    }
}

const INTERVAL: Duration = Duration::from_millis(500);

fn setup_with(config: ConductorConfig) -> (Arc<LocalRelay>, Arc<EchoFactory>, Conductor) {
    let relay = Arc::new(LocalRelay::new());
    let factory = Arc::new(EchoFactory::default());
    let conductor = Conductor::new(
        relay.clone(),
        factory.clone(),
        RtcConfig::default(),
        config,
        None,
    )
    .unwrap();
    (relay, factory, conductor)
}

fn setup() -> (Arc<LocalRelay>, Arc<EchoFactory>, Conductor) {
    setup_with(ConductorConfig::default())
}

fn sent(relay: &LocalRelay) -> Vec<(PeerId, String)> {
    relay.sent()
}

fn pairs(items: &[(PeerId, &str)]) -> Vec<(PeerId, String)> {
    items.iter().map(|(id, s)| (*id, s.to_string())).collect()
}

/// Let the worker run through `n` retry intervals.
async fn advance(n: u32) {
    tokio::time::sleep(INTERVAL * n + Duration::from_millis(50)).await;
}

// ── Session lifecycle ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_peer_count_tracks_connects_and_disconnects() {
    let (relay, factory, conductor) = setup();

    relay.peer_joined(1, "alice");
    relay.peer_joined(2, "bob");
    relay.peer_joined(3, "carol");
    assert_eq!(conductor.peer_count(), 3);

    relay.peer_left(2);
    assert_eq!(conductor.peer_ids(), vec![1, 3]);
    assert!(conductor.peer(2).is_none());
    assert_eq!(conductor.peer(3).map(|s| s.peer_id()), Some(3));
    assert_eq!(factory.created(), 3);
    assert_eq!(factory.dropped(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_double_removal_is_harmless() {
    let (relay, factory, conductor) = setup();

    relay.peer_joined(1, "alice");
    relay.peer_left(1);
    factory.link(1).report_state(IceConnectionState::Failed);
    relay.peer_left(1);
    assert_eq!(conductor.peer_count(), 0);
    assert_eq!(factory.dropped(), 1);

    relay.peer_joined(2, "bob");
    factory.link(2).report_state(IceConnectionState::Closed);
    relay.peer_left(2);
    assert_eq!(conductor.peer_count(), 0);
    assert_eq!(factory.dropped(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_non_terminal_states_keep_session() {
    let (relay, factory, conductor) = setup();
    relay.peer_joined(1, "alice");

    let link = factory.link(1);
    for state in [
        IceConnectionState::New,
        IceConnectionState::Checking,
        IceConnectionState::Connected,
        IceConnectionState::Completed,
    ] {
        link.report_state(state);
    }
    assert_eq!(conductor.peer_ids(), vec![1]);

    link.report_state(IceConnectionState::Disconnected);
    assert_eq!(conductor.peer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_peer_message_is_ignored() {
    let (relay, factory, conductor) = setup();
    conductor.connect_signalling("host");

    relay.deliver(42, "offer");
    advance(2).await;

    assert_eq!(conductor.peer_count(), 0);
    assert_eq!(factory.created(), 0);
    assert!(sent(&relay).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_connect_releases_previous_session() {
    let (relay, factory, conductor) = setup();

    relay.peer_joined(1, "first");
    relay.peer_joined(1, "second");

    assert_eq!(conductor.peer_count(), 1);
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.dropped(), 1);
    assert_eq!(*factory.names.lock(), vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_factory_failure_registers_nothing() {
    let (relay, _factory, conductor) = setup();
    relay.peer_joined(1, "reject");
    assert_eq!(conductor.peer_count(), 0);
}

// ── Outbound delivery ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_inbound_message_routes_to_session() {
    let (relay, _factory, conductor) = setup();
    conductor.connect_signalling("host");
    assert_eq!(relay.client_name().as_deref(), Some("host"));
    assert!(conductor.is_relay_active());

    relay.peer_joined(7, "viewer");
    relay.deliver(7, "hello");
    advance(2).await;

    assert_eq!(sent(&relay), pairs(&[(7, "ack:hello")]));
    assert_eq!(conductor.pending_messages(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_sends_keep_order_then_drain() {
    let (relay, factory, conductor) = setup();
    conductor.connect_signalling("host");
    relay.peer_joined(1, "a");
    relay.peer_joined(2, "b");
    relay.set_unreachable(true);

    factory.link(1).send_message("m1").unwrap();
    factory.link(2).send_message("m2").unwrap();
    factory.link(1).send_message("m3").unwrap();

    advance(5).await;
    assert!(relay.send_attempts() >= 4);
    assert!(sent(&relay).is_empty());
    assert_eq!(conductor.pending_messages(), 3);

    relay.set_unreachable(false);
    advance(4).await;
    assert_eq!(sent(&relay), pairs(&[(1, "m1"), (2, "m2"), (1, "m3")]));
    assert_eq!(conductor.pending_messages(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_one_message_per_interval() {
    let (relay, _factory, conductor) = setup();
    conductor.connect_signalling("host");

    let link = conductor.link(1);
    for i in 0..3 {
        link.send_message(format!("m{i}")).unwrap();
    }

    advance(1).await;
    assert_eq!(sent(&relay).len(), 1);
    advance(1).await;
    assert_eq!(sent(&relay).len(), 2);
    advance(1).await;
    assert_eq!(sent(&relay).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_signed_out_queue_drains_after_sign_in() {
    let (relay, _factory, conductor) = setup();

    let link = conductor.link(5);
    link.send_message("a").unwrap();
    link.send_message("b").unwrap();
    advance(4).await;

    // Nothing is attempted while signed out.
    assert_eq!(relay.send_attempts(), 0);
    assert_eq!(conductor.pending_messages(), 2);

    conductor.connect_signalling("host");
    link.send_message("c").unwrap();
    advance(4).await;

    assert_eq!(sent(&relay), pairs(&[(5, "a"), (5, "b"), (5, "c")]));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_pauses_delivery() {
    let (relay, _factory, conductor) = setup();
    conductor.connect_signalling("host");

    let link = conductor.link(1);
    link.send_message("x").unwrap();
    relay.disconnect();
    assert!(!conductor.is_relay_active());
    link.send_message("y").unwrap();
    advance(4).await;

    assert_eq!(relay.send_attempts(), 0);
    assert_eq!(conductor.pending_messages(), 2);

    conductor.connect_signalling("host");
    advance(3).await;
    assert_eq!(sent(&relay), pairs(&[(1, "x"), (1, "y")]));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_relay_reports_failure() {
    let (relay, _factory, conductor) = setup();
    relay.set_unreachable(true);
    conductor.connect_signalling("host");
    assert!(!relay.is_signed_in());
    assert!(!conductor.is_relay_active());
}

#[tokio::test(start_paused = true)]
async fn test_queue_cap_drops_oldest() {
    let (relay, _factory, conductor) = setup_with(ConductorConfig {
        max_queued_messages: Some(2),
        overflow_policy: OverflowPolicy::DropOldest,
        ..Default::default()
    });

    let link = conductor.link(1);
    for payload in ["a", "b", "c"] {
        link.send_message(payload).unwrap();
    }
    advance(1).await;
    assert_eq!(conductor.pending_messages(), 2);

    conductor.connect_signalling("host");
    advance(3).await;
    assert_eq!(sent(&relay), pairs(&[(1, "b"), (1, "c")]));
}

#[tokio::test(start_paused = true)]
async fn test_queue_cap_drops_newest() {
    let (relay, _factory, conductor) = setup_with(ConductorConfig {
        max_queued_messages: Some(2),
        overflow_policy: OverflowPolicy::DropNewest,
        ..Default::default()
    });

    let link = conductor.link(1);
    for payload in ["a", "b", "c"] {
        link.send_message(payload).unwrap();
    }
    conductor.connect_signalling("host");
    advance(3).await;
    assert_eq!(sent(&relay), pairs(&[(1, "a"), (1, "b")]));
}

// ── Shutdown ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_shutdown_drops_queue_and_sessions() {
    let (relay, factory, conductor) = setup();
    relay.peer_joined(1, "alice");

    let link = factory.link(1);
    link.send_message("never delivered").unwrap();
    advance(1).await;
    assert_eq!(conductor.pending_messages(), 1);

    tokio_test::assert_ok!(conductor.shutdown().await);
    assert_eq!(conductor.peer_count(), 0);
    assert_eq!(factory.dropped(), 1);
    assert_eq!(conductor.pending_messages(), 0);

    assert!(matches!(
        link.send_message("late"),
        Err(StreamkitError::ChannelClosed)
    ));

    // Signing in afterwards delivers nothing.
    conductor.connect_signalling("host");
    advance(2).await;
    assert!(sent(&relay).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_relay_events_after_shutdown_are_ignored() {
    let (relay, factory, conductor) = setup();
    relay.peer_joined(1, "alice");
    tokio_test::assert_ok!(conductor.shutdown().await);
    assert_eq!(factory.created(), 1);

    conductor.connect_signalling("host");
    relay.peer_joined(9, "late");
    relay.deliver(1, "hello");

    assert_eq!(conductor.peer_count(), 0);
    assert_eq!(factory.created(), 1);
    assert_eq!(factory.dropped(), 1);
    assert!(!conductor.is_relay_active());

    advance(2).await;
    assert!(sent(&relay).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_conductor_detaches_relay() {
    let (relay, factory, conductor) = setup();
    relay.peer_joined(1, "alice");
    drop(conductor);

    // The relay only holds the conductor weakly.
    relay.peer_joined(2, "bob");
    assert_eq!(factory.created(), 1);
    assert_eq!(factory.dropped(), 1);
}

#[test]
fn test_new_outside_runtime_fails() {
    let result = Conductor::new(
        Arc::new(LocalRelay::new()),
        Arc::new(EchoFactory::default()),
        RtcConfig::default(),
        ConductorConfig::default(),
        None,
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let result = Conductor::new(
        Arc::new(LocalRelay::new()),
        Arc::new(EchoFactory::default()),
        RtcConfig::default(),
        ConductorConfig {
            retry_interval: Duration::ZERO,
            ..Default::default()
        },
        None,
    );
    assert!(matches!(result, Err(StreamkitError::Config(_))));
}
