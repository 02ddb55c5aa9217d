//! In-process signaling relay.
//!
//! `LocalRelay` implements [`SignalingChannel`] without a socket. Remote
//! peers are simulated by calling [`peer_joined`](LocalRelay::peer_joined),
//! [`deliver`](LocalRelay::deliver) and friends; messages the conductor
//! sends are collected in an outbox. The relay can be made unreachable so
//! every send fails, which is how transient relay failure is exercised.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::{PeerId, SignalingChannel, SignalingObserver};

#[derive(Default)]
struct RelayState {
    observer: Option<Weak<dyn SignalingObserver>>,
    client_name: Option<String>,
    signed_in: bool,
    unreachable: bool,
    outbox: Vec<(PeerId, String)>,
}

/// Signaling relay that lives entirely in this process.
#[derive(Default)]
pub struct LocalRelay {
    state: Mutex<RelayState>,
    send_attempts: AtomicUsize,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upgrade the observer outside the state lock so callbacks may call
    /// back into the relay.
    fn observer(&self) -> Option<Arc<dyn SignalingObserver>> {
        self.state.lock().observer.as_ref().and_then(Weak::upgrade)
    }

    // ── Simulated relay events ───────────────────────────────────

    /// A remote peer signed in to the relay.
    pub fn peer_joined(&self, peer_id: PeerId, name: &str) {
        if let Some(observer) = self.observer() {
            observer.on_peer_connected(peer_id, name);
        }
    }

    /// A remote peer signed out of the relay.
    pub fn peer_left(&self, peer_id: PeerId) {
        if let Some(observer) = self.observer() {
            observer.on_peer_disconnected(peer_id);
        }
    }

    /// A remote peer sent `message` to us.
    pub fn deliver(&self, peer_id: PeerId, message: &str) {
        if let Some(observer) = self.observer() {
            observer.on_message_from_peer(peer_id, message);
        }
    }

    /// Drop our own relay session.
    pub fn disconnect(&self) {
        self.state.lock().signed_in = false;
        if let Some(observer) = self.observer() {
            observer.on_disconnected();
        }
    }

    /// While unreachable, `send_to_peer` fails and `connect` reports a
    /// server connection failure.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    // ── Inspection ───────────────────────────────────────────────

    /// Messages accepted so far, in acceptance order.
    pub fn sent(&self) -> Vec<(PeerId, String)> {
        self.state.lock().outbox.clone()
    }

    /// Drain the outbox.
    pub fn take_sent(&self) -> Vec<(PeerId, String)> {
        std::mem::take(&mut self.state.lock().outbox)
    }

    /// Total `send_to_peer` calls, successful or not.
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn is_signed_in(&self) -> bool {
        self.state.lock().signed_in
    }

    pub fn client_name(&self) -> Option<String> {
        self.state.lock().client_name.clone()
    }
}

impl SignalingChannel for LocalRelay {
    fn register_observer(&self, observer: Weak<dyn SignalingObserver>) {
        self.state.lock().observer = Some(observer);
    }

    fn connect(&self, server: &str, port: u16, client_name: &str) {
        let accepted = {
            let mut state = self.state.lock();
            state.client_name = Some(client_name.to_string());
            state.signed_in = !state.unreachable;
            state.signed_in
        };
        debug!(server, port, client_name, accepted, "local relay connect");

        let Some(observer) = self.observer() else {
            return;
        };
        if accepted {
            observer.on_signed_in();
        } else {
            observer.on_server_connection_failure();
        }
    }

    fn send_to_peer(&self, peer_id: PeerId, message: &str) -> bool {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.unreachable || !state.signed_in {
            return false;
        }
        state.outbox.push((peer_id, message.to_string()));
        true
    }
}
