//! Peer-id → session registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::PeerSession;
use crate::signaling::PeerId;

/// Live sessions keyed by relay peer id.
///
/// The registry holds the authoritative strong reference to each session.
/// At most one entry exists per id, and removing an absent id is a no-op.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, Arc<dyn PeerSession>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `session` under `peer_id`, returning any entry it displaced.
    pub fn insert(
        &mut self,
        peer_id: PeerId,
        session: Arc<dyn PeerSession>,
    ) -> Option<Arc<dyn PeerSession>> {
        self.peers.insert(peer_id, session)
    }

    /// Remove the entry for `peer_id`, if any.
    pub fn remove(&mut self, peer_id: PeerId) -> Option<Arc<dyn PeerSession>> {
        self.peers.remove(&peer_id)
    }

    /// Look up a session without creating one.
    pub fn get(&self, peer_id: PeerId) -> Option<Arc<dyn PeerSession>> {
        self.peers.get(&peer_id).cloned()
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.peers.contains_key(&peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Empty the registry, returning the sessions so the caller controls
    /// where they are dropped.
    pub fn drain(&mut self) -> Vec<Arc<dyn PeerSession>> {
        self.peers.drain().map(|(_, session)| session).collect()
    }
}
