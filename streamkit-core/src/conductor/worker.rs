//! The conductor's processing task.
//!
//! The worker is the only owner of the [`OutboundQueue`]. Sessions reach it
//! through an unbounded MPSC channel; relay state changes arrive on the same
//! channel so they are observed in order with the enqueues around them.
//!
//! Delivery is driven by one deferred retry timer:
//!
//! ```text
//!   enqueue / signed-in ──► arm(interval) ──► fire
//!                                              │ relay inactive → disarm
//!                                              │ send ok  → pop, re-arm if non-empty
//!                                              └ send err → keep head, re-arm
//! ```
//!
//! There is no backoff and no attempt cap, so a head the relay never
//! accepts blocks every message behind it.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::WorkerEvent;
use super::queue::{OutboundMessage, OutboundQueue};
use crate::signaling::SignalingChannel;

/// State the worker shares with the conductor's callback side.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    /// Set on signed-in, cleared on disconnect.
    pub relay_active: AtomicBool,
    /// Mirror of the queue length for observers outside the worker.
    pub pending: AtomicUsize,
}

pub(crate) struct Worker {
    channel: Arc<dyn SignalingChannel>,
    run_state: Arc<RunState>,
    retry_interval: Duration,
    queue: OutboundQueue,
    retry: Option<Pin<Box<Sleep>>>,
}

impl Worker {
    pub(crate) fn new(
        channel: Arc<dyn SignalingChannel>,
        run_state: Arc<RunState>,
        retry_interval: Duration,
        queue: OutboundQueue,
    ) -> Self {
        Self {
            channel,
            run_state,
            retry_interval,
            queue,
            retry: None,
        }
    }

    /// Process events until `cancel` fires or every sender is gone.
    ///
    /// Cancellation is checked first on every iteration, so once shutdown
    /// begins the queue is never touched again. Whatever is still queued
    /// is dropped.
    pub(crate) async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
        cancel: CancellationToken,
    ) {
        debug!("conductor worker started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },

                _ = wait_for(&mut self.retry) => {
                    self.retry = None;
                    self.on_retry_timer();
                }
            }
        }

        let dropped = self.queue.clear();
        self.sync_pending();
        if dropped > 0 {
            warn!(dropped, "conductor stopped with undelivered signaling messages");
        }
        debug!("conductor worker stopped");
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Enqueue(message) => self.enqueue(message),
            WorkerEvent::RelayStateChanged => {
                if self.relay_active() {
                    self.arm_if_needed();
                } else if self.retry.take().is_some() {
                    trace!(queued = self.queue.len(), "relay inactive; retry timer disarmed");
                }
            }
        }
    }

    fn enqueue(&mut self, message: OutboundMessage) {
        let peer_id = message.peer_id;
        if let Some(dropped) = self.queue.push(message) {
            warn!(
                peer_id = dropped.peer_id,
                queued = self.queue.len(),
                "outbound queue full; message dropped"
            );
        }
        self.sync_pending();
        trace!(peer_id, queued = self.queue.len(), "outbound message queued");

        if self.relay_active() {
            self.arm_if_needed();
        }
    }

    fn on_retry_timer(&mut self) {
        if !self.relay_active() {
            return;
        }
        let Some(head) = self.queue.head() else {
            return;
        };

        if self.channel.send_to_peer(head.peer_id, &head.payload) {
            trace!(peer_id = head.peer_id, "signaling message delivered");
            self.queue.pop();
            self.sync_pending();
        } else {
            debug!(
                peer_id = head.peer_id,
                queued = self.queue.len(),
                "relay rejected signaling message; retrying"
            );
        }

        self.arm_if_needed();
    }

    fn arm_if_needed(&mut self) {
        if self.retry.is_none() && !self.queue.is_empty() {
            self.retry = Some(Box::pin(tokio::time::sleep(self.retry_interval)));
        }
    }

    fn relay_active(&self) -> bool {
        self.run_state.relay_active.load(Ordering::SeqCst)
    }

    fn sync_pending(&self) {
        self.run_state
            .pending
            .store(self.queue.len(), Ordering::SeqCst);
    }
}

/// Resolves when the armed timer fires; pends forever while disarmed.
async fn wait_for(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
