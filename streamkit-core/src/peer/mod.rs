//! Per-peer session interfaces.
//!
//! A [`PeerSession`] owns one remote participant's media pipeline. The
//! conductor builds sessions through a [`PeerSessionFactory`] and hands each
//! one a [`PeerLink`], its only way back into the conductor: queue an
//! outbound signaling message, or report a connection-state change.

pub mod registry;

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::debug;

use crate::capture::gpu::GpuDevice;
use crate::conductor::WorkerEvent;
use crate::conductor::queue::OutboundMessage;
use crate::config::RtcConfig;
use crate::error::StreamkitError;
use crate::signaling::PeerId;

pub use registry::PeerRegistry;

// ── IceConnectionState ───────────────────────────────────────────

/// Connectivity state a session reports for its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl IceConnectionState {
    /// States after which the session is torn down.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected | Self::Closed)
    }
}

impl std::fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ── PeerSession ──────────────────────────────────────────────────

/// One connected peer's media pipeline.
pub trait PeerSession: Send + Sync {
    fn peer_id(&self) -> PeerId;

    /// Consume a signaling message relayed from the remote peer.
    fn handle_message(&self, message: &str);
}

/// Receives connection-state reports from sessions.
pub trait PeerStateObserver: Send + Sync {
    fn on_peer_connection_state_changed(&self, peer_id: PeerId, state: IceConnectionState);
}

/// Builds sessions for newly connected peers.
pub trait PeerSessionFactory: Send + Sync {
    fn create(&self, ctx: PeerSessionContext) -> Result<Arc<dyn PeerSession>, StreamkitError>;
}

/// Everything a new session is constructed with.
pub struct PeerSessionContext {
    pub peer_id: PeerId,
    pub name: String,
    pub config: Arc<RtcConfig>,
    pub link: PeerLink,
    pub device: Option<Arc<dyn GpuDevice>>,
    pub enable_software: bool,
}

// ── PeerLink ─────────────────────────────────────────────────────

/// A session's handle back into the conductor.
///
/// Cloneable and usable from any thread. The link holds the conductor
/// weakly, so a session that outlives its conductor degrades to no-ops.
#[derive(Clone)]
pub struct PeerLink {
    peer_id: PeerId,
    events: mpsc::UnboundedSender<WorkerEvent>,
    state_observer: Weak<dyn PeerStateObserver>,
}

impl PeerLink {
    pub(crate) fn new(
        peer_id: PeerId,
        events: mpsc::UnboundedSender<WorkerEvent>,
        state_observer: Weak<dyn PeerStateObserver>,
    ) -> Self {
        Self {
            peer_id,
            events,
            state_observer,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Append a message for this peer to the conductor's outbound queue.
    ///
    /// Fails with [`StreamkitError::ChannelClosed`] once the conductor has
    /// shut down.
    pub fn send_message(&self, payload: impl Into<String>) -> Result<(), StreamkitError> {
        let message = OutboundMessage::new(self.peer_id, payload);
        self.events.send(WorkerEvent::Enqueue(message)).map_err(|e| {
            debug!(peer_id = self.peer_id, "conductor gone; outbound message dropped");
            StreamkitError::from(e)
        })
    }

    /// Report a transport state change. Terminal states remove the session
    /// from the conductor.
    pub fn report_state(&self, state: IceConnectionState) {
        if let Some(observer) = self.state_observer.upgrade() {
            observer.on_peer_connection_state_changed(self.peer_id, state);
        }
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("peer_id", &self.peer_id)
            .field("closed", &self.events.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct StateLog(Mutex<Vec<(PeerId, IceConnectionState)>>);

    impl PeerStateObserver for StateLog {
        fn on_peer_connection_state_changed(&self, peer_id: PeerId, state: IceConnectionState) {
            self.0.lock().push((peer_id, state));
        }
    }

    #[test]
    fn terminal_states() {
        assert!(IceConnectionState::Disconnected.is_terminal());
        assert!(IceConnectionState::Failed.is_terminal());
        assert!(IceConnectionState::Closed.is_terminal());
        assert!(!IceConnectionState::Connected.is_terminal());
        assert!(!IceConnectionState::Checking.is_terminal());
    }

    #[test]
    fn link_enqueues_tagged_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let log = Arc::new(StateLog::default());
        let weak: Weak<StateLog> = Arc::downgrade(&log);
        let link = PeerLink::new(4, tx, weak);

        link.send_message("offer").unwrap();
        match rx.try_recv().unwrap() {
            WorkerEvent::Enqueue(msg) => {
                assert_eq!(msg.peer_id, 4);
                assert_eq!(msg.payload, "offer");
            }
            other => panic!("unexpected event {other:?}"),
        }

        link.report_state(IceConnectionState::Connected);
        assert_eq!(*log.0.lock(), vec![(4, IceConnectionState::Connected)]);
    }

    #[test]
    fn link_fails_after_conductor_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(StateLog::default());
        let weak: Weak<StateLog> = Arc::downgrade(&log);
        let link = PeerLink::new(1, tx, weak);
        drop(rx);
        drop(log);

        assert!(matches!(
            link.send_message("late"),
            Err(StreamkitError::ChannelClosed)
        ));
        // No observer left: reporting is a no-op.
        link.report_state(IceConnectionState::Closed);
    }
}
