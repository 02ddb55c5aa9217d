//! Outbound signaling queue.
//!
//! Strict FIFO with head-of-line delivery: only the head is ever attempted,
//! and it stays at the head until the relay accepts it. Entries are never
//! reordered or deduplicated.

use std::collections::VecDeque;

use crate::config::OverflowPolicy;
use crate::signaling::PeerId;

/// A signaling message waiting for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub peer_id: PeerId,
    pub payload: String,
}

impl OutboundMessage {
    pub fn new(peer_id: PeerId, payload: impl Into<String>) -> Self {
        Self {
            peer_id,
            payload: payload.into(),
        }
    }
}

/// FIFO of outbound messages with an optional length cap.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<OutboundMessage>,
    capacity: Option<usize>,
    policy: OverflowPolicy,
}

impl OutboundQueue {
    /// An unbounded queue.
    pub fn new() -> Self {
        Self::with_capacity_limit(None, OverflowPolicy::default())
    }

    /// A queue holding at most `capacity` entries (`None` = unbounded).
    pub fn with_capacity_limit(capacity: Option<usize>, policy: OverflowPolicy) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            policy,
        }
    }

    /// Append `message`. When the cap is reached, returns the entry the
    /// overflow policy discarded.
    pub fn push(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        match self.capacity {
            Some(cap) if self.entries.len() >= cap => match self.policy {
                OverflowPolicy::DropNewest => Some(message),
                OverflowPolicy::DropOldest => {
                    let dropped = self.entries.pop_front();
                    self.entries.push_back(message);
                    dropped
                }
            },
            _ => {
                self.entries.push_back(message);
                None
            }
        }
    }

    /// The entry the next delivery attempt targets.
    pub fn head(&self) -> Option<&OutboundMessage> {
        self.entries.front()
    }

    /// Remove the head after the relay accepted it.
    pub fn pop(&mut self) -> Option<OutboundMessage> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discard everything; returns how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.entries.iter()
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}
