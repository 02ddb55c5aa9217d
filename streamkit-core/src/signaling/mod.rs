//! Signaling relay interfaces.
//!
//! The relay socket and its wire protocol live outside this crate. The
//! conductor only needs a [`SignalingChannel`] it can connect and send
//! through, and it receives relay events as a [`SignalingObserver`].

pub mod local;

use std::sync::Weak;

pub use local::LocalRelay;

/// Relay-assigned peer identifier.
pub type PeerId = i32;

// ── SignalingChannel ─────────────────────────────────────────────

/// Command side of the relay connection.
pub trait SignalingChannel: Send + Sync {
    /// Register the observer that receives lifecycle events. The channel
    /// holds it weakly; dropping the observer silences the channel.
    fn register_observer(&self, observer: Weak<dyn SignalingObserver>);

    /// Begin connecting to `server:port` as `client_name`. The outcome is
    /// reported through [`SignalingObserver::on_signed_in`] or
    /// [`SignalingObserver::on_server_connection_failure`].
    fn connect(&self, server: &str, port: u16, client_name: &str);

    /// Hand one message to the relay. Must not block; returns `false` when
    /// the relay did not accept it.
    fn send_to_peer(&self, peer_id: PeerId, message: &str) -> bool;
}

// ── SignalingObserver ────────────────────────────────────────────

/// Event side of the relay connection.
pub trait SignalingObserver: Send + Sync {
    fn on_signed_in(&self);
    fn on_disconnected(&self);
    fn on_peer_connected(&self, peer_id: PeerId, name: &str);
    fn on_peer_disconnected(&self, peer_id: PeerId);
    fn on_message_from_peer(&self, peer_id: PeerId, message: &str);
    fn on_message_sent(&self, status: i32);
    fn on_server_connection_failure(&self);
}
