//! Multi-peer signaling conductor.
//!
//! Bridges relay events to per-peer sessions and delivers the sessions'
//! outbound signaling through a retrying FIFO.
//!
//! ```text
//!   SignalingChannel ──events──► Conductor ──create/route/remove──► PeerSession
//!          ▲                         │                                  │
//!          └──── send_to_peer ◄── Worker ◄──── PeerLink::send_message ──┘
//! ```
//!
//! Relay callbacks run on whatever thread the channel uses and touch only
//! the registry. Queue mutation happens exclusively on the worker task.

pub mod queue;
mod worker;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::gpu::GpuDevice;
use crate::config::{ConductorConfig, RtcConfig};
use crate::error::StreamkitError;
use crate::peer::{
    IceConnectionState, PeerLink, PeerRegistry, PeerSession, PeerSessionContext,
    PeerSessionFactory, PeerStateObserver,
};
use crate::signaling::{PeerId, SignalingChannel, SignalingObserver};

use self::queue::{OutboundMessage, OutboundQueue};
use self::worker::{RunState, Worker};

/// Messages from the callback side to the worker.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Enqueue(OutboundMessage),
    /// `RunState::relay_active` changed; re-evaluate the retry timer.
    RelayStateChanged,
}

// ── Conductor ────────────────────────────────────────────────────

/// Owns the peer registry, the outbound queue worker, and the relay
/// observer registration.
///
/// The worker is spawned on the current tokio runtime in [`new`](Self::new)
/// and cancelled on [`shutdown`](Self::shutdown) or drop. Messages still
/// queued at that point are discarded, and later relay events no longer
/// create sessions, route messages, or change the relay state.
pub struct Conductor {
    inner: Arc<ConductorInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct ConductorInner {
    channel: Arc<dyn SignalingChannel>,
    factory: Arc<dyn PeerSessionFactory>,
    rtc_config: Arc<RtcConfig>,
    config: ConductorConfig,
    device: Option<Arc<dyn GpuDevice>>,
    peers: Mutex<PeerRegistry>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    run_state: Arc<RunState>,
    /// Cancelled once shutdown begins. Shared with the worker.
    cancel: CancellationToken,
    self_ref: Weak<ConductorInner>,
}

impl Conductor {
    /// Build a conductor, register it with `channel`, and start its worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        channel: Arc<dyn SignalingChannel>,
        factory: Arc<dyn PeerSessionFactory>,
        rtc_config: RtcConfig,
        config: ConductorConfig,
        device: Option<Arc<dyn GpuDevice>>,
    ) -> Result<Self, StreamkitError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| StreamkitError::Other("conductor requires a tokio runtime".into()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let run_state = Arc::new(RunState::default());
        let queue = OutboundQueue::with_capacity_limit(
            config.max_queued_messages,
            config.overflow_policy,
        );
        let worker = Worker::new(
            Arc::clone(&channel),
            Arc::clone(&run_state),
            config.retry_interval,
            queue,
        );

        let cancel = CancellationToken::new();
        let inner = Arc::new_cyclic(|self_ref| ConductorInner {
            channel: Arc::clone(&channel),
            factory,
            rtc_config: Arc::new(rtc_config),
            config,
            device,
            peers: Mutex::new(PeerRegistry::new()),
            events: events_tx,
            run_state,
            cancel: cancel.clone(),
            self_ref: self_ref.clone(),
        });

        let observer: Weak<ConductorInner> = Arc::downgrade(&inner);
        channel.register_observer(observer);

        let handle = runtime.spawn(worker.run(events_rx, cancel));

        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Connect to the configured relay as `client_name`. The outcome
    /// arrives later as `on_signed_in` or `on_server_connection_failure`.
    pub fn connect_signalling(&self, client_name: &str) {
        let rtc = &self.inner.rtc_config;
        info!(server = %rtc.server, port = rtc.port, client_name, "connecting to signaling relay");
        self.inner.channel.connect(&rtc.server, rtc.port, client_name);
    }

    /// Ids of every registered peer, ascending.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.inner.peers.lock().ids()
    }

    /// The session registered for `peer_id`, without creating one.
    pub fn peer(&self, peer_id: PeerId) -> Option<Arc<dyn PeerSession>> {
        self.inner.peers.lock().get(peer_id)
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().len()
    }

    /// Outbound messages not yet accepted by the relay.
    pub fn pending_messages(&self) -> usize {
        self.inner.run_state.pending.load(Ordering::SeqCst)
    }

    pub fn is_relay_active(&self) -> bool {
        self.inner.run_state.relay_active.load(Ordering::SeqCst)
    }

    /// A link for `peer_id` that is not tied to a registered session.
    /// Useful for pushing server-originated messages through the queue.
    pub fn link(&self, peer_id: PeerId) -> PeerLink {
        self.inner.link(peer_id)
    }

    /// Stop the worker, wait up to the configured shutdown timeout for it
    /// to exit, then release every session.
    pub async fn shutdown(&self) -> Result<(), StreamkitError> {
        self.inner.cancel.cancel();

        let handle = self.worker.lock().take();
        let result = match handle {
            Some(mut handle) => {
                let timeout = self.inner.config.shutdown_timeout;
                match tokio::time::timeout(timeout, &mut handle).await {
                    Ok(_) => Ok(()),
                    Err(_) => {
                        warn!(?timeout, "conductor worker did not stop in time; aborting");
                        handle.abort();
                        Err(StreamkitError::Timeout(timeout))
                    }
                }
            }
            None => Ok(()),
        };

        let sessions = self.inner.peers.lock().drain();
        if !sessions.is_empty() {
            info!(released = sessions.len(), "released peer sessions on shutdown");
        }
        drop(sessions);

        result
    }
}

impl Drop for Conductor {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for Conductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conductor")
            .field("peers", &self.peer_ids())
            .field("pending_messages", &self.pending_messages())
            .field("relay_active", &self.is_relay_active())
            .finish()
    }
}

/// Lets a channel that is not wired through `register_observer` (or a
/// test) drive the conductor directly.
impl SignalingObserver for Conductor {
    fn on_signed_in(&self) {
        self.inner.on_signed_in();
    }
    fn on_disconnected(&self) {
        self.inner.on_disconnected();
    }
    fn on_peer_connected(&self, peer_id: PeerId, name: &str) {
        self.inner.on_peer_connected(peer_id, name);
    }
    fn on_peer_disconnected(&self, peer_id: PeerId) {
        self.inner.on_peer_disconnected(peer_id);
    }
    fn on_message_from_peer(&self, peer_id: PeerId, message: &str) {
        self.inner.on_message_from_peer(peer_id, message);
    }
    fn on_message_sent(&self, status: i32) {
        self.inner.on_message_sent(status);
    }
    fn on_server_connection_failure(&self) {
        self.inner.on_server_connection_failure();
    }
}

impl PeerStateObserver for Conductor {
    fn on_peer_connection_state_changed(&self, peer_id: PeerId, state: IceConnectionState) {
        self.inner.on_peer_connection_state_changed(peer_id, state);
    }
}

// ── ConductorInner ───────────────────────────────────────────────

impl ConductorInner {
    fn link(&self, peer_id: PeerId) -> PeerLink {
        let observer: Weak<dyn PeerStateObserver> = self.self_ref.clone();
        PeerLink::new(peer_id, self.events.clone(), observer)
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn set_relay_active(&self, active: bool) {
        if self.is_closed() {
            debug!(active, "relay state change after shutdown ignored");
            return;
        }
        self.run_state.relay_active.store(active, Ordering::SeqCst);
        // A closed worker means shutdown already began.
        let _ = self.events.send(WorkerEvent::RelayStateChanged);
    }

    /// Single removal path for both disconnect triggers. Sessions are
    /// dropped outside the registry lock so their destructors may call
    /// back into the conductor.
    fn remove_peer(&self, peer_id: PeerId, reason: &'static str) {
        let removed = self.peers.lock().remove(peer_id);
        match removed {
            Some(session) => {
                info!(peer_id, reason, "peer session removed");
                drop(session);
            }
            None => debug!(peer_id, reason, "peer already removed"),
        }
    }
}

impl SignalingObserver for ConductorInner {
    fn on_signed_in(&self) {
        info!("signed in to signaling relay");
        self.set_relay_active(true);
    }

    fn on_disconnected(&self) {
        info!(
            queued = self.run_state.pending.load(Ordering::SeqCst),
            "disconnected from signaling relay"
        );
        self.set_relay_active(false);
    }

    fn on_peer_connected(&self, peer_id: PeerId, name: &str) {
        if self.is_closed() {
            debug!(peer_id, name, "peer connected after shutdown; ignored");
            return;
        }

        // Release the previous session before constructing its replacement.
        let previous = self.peers.lock().remove(peer_id);
        if let Some(previous) = previous {
            warn!(peer_id, "peer connected twice; releasing previous session");
            drop(previous);
        }

        let ctx = PeerSessionContext {
            peer_id,
            name: name.to_string(),
            config: Arc::clone(&self.rtc_config),
            link: self.link(peer_id),
            device: self.device.clone(),
            enable_software: self.config.enable_software,
        };

        let session = match self.factory.create(ctx) {
            Ok(session) => session,
            Err(e) => {
                warn!(peer_id, name, "failed to create peer session: {e}");
                return;
            }
        };

        // Checked under the registry lock; shutdown cancels before it drains.
        let displaced = {
            let mut peers = self.peers.lock();
            if self.is_closed() {
                Err(session)
            } else {
                Ok(peers.insert(peer_id, session))
            }
        };
        match displaced {
            Ok(displaced) => {
                drop(displaced);
                info!(peer_id, name, "peer session created");
            }
            Err(session) => {
                debug!(peer_id, name, "shutdown raced session creation; released");
                drop(session);
            }
        }
    }

    fn on_peer_disconnected(&self, peer_id: PeerId) {
        self.remove_peer(peer_id, "peer disconnected");
    }

    fn on_message_from_peer(&self, peer_id: PeerId, message: &str) {
        if self.is_closed() {
            debug!(peer_id, "message after shutdown ignored");
            return;
        }
        let session = self.peers.lock().get(peer_id);
        match session {
            Some(session) => session.handle_message(message),
            None => debug!(peer_id, "message from unknown peer ignored"),
        }
    }

    fn on_message_sent(&self, status: i32) {
        debug!(status, "relay reported message sent");
    }

    fn on_server_connection_failure(&self) {
        warn!(
            server = %self.rtc_config.server,
            port = self.rtc_config.port,
            "signaling server connection failed"
        );
    }
}

impl PeerStateObserver for ConductorInner {
    fn on_peer_connection_state_changed(&self, peer_id: PeerId, state: IceConnectionState) {
        debug!(peer_id, %state, "peer connection state changed");
        if state.is_terminal() {
            self.remove_peer(peer_id, "connection state terminal");
        }
    }
}
