//! Runtime configuration for the conductor and the capture pipeline.
//!
//! These are plain structs; loading them from a file is the host's job.

use std::time::Duration;

use crate::error::StreamkitError;

/// Default interval between delivery attempts for the queue head.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

// ── RtcConfig ────────────────────────────────────────────────────

/// Relay and media settings shared by the conductor and every peer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfig {
    /// Signaling relay host name or address.
    pub server: String,
    /// Signaling relay port.
    pub port: u16,
    /// STUN/TURN URLs handed to each session.
    pub ice_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".into(),
            port: 8888,
            ice_servers: vec!["stun:stun.l.google.com:19302".into()],
        }
    }
}

// ── OverflowPolicy ───────────────────────────────────────────────

/// What to do when an enqueue would exceed `max_queued_messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the head (the oldest, currently retried entry).
    #[default]
    DropOldest,
    /// Discard the message being enqueued.
    DropNewest,
}

// ── ConductorConfig ──────────────────────────────────────────────

/// Configuration for [`Conductor`](crate::conductor::Conductor).
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    /// Fixed delay between delivery attempts. There is no backoff.
    pub retry_interval: Duration,
    /// Upper bound on queued outbound messages. `None` keeps the queue
    /// unbounded, so it grows without limit while signed out.
    pub max_queued_messages: Option<usize>,
    /// Applied only when `max_queued_messages` is set.
    pub overflow_policy: OverflowPolicy,
    /// How long `shutdown` waits for the worker to exit.
    pub shutdown_timeout: Duration,
    /// Passed to every session: prefer the software encoder.
    pub enable_software: bool,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_queued_messages: None,
            overflow_policy: OverflowPolicy::default(),
            shutdown_timeout: Duration::from_secs(2),
            enable_software: false,
        }
    }
}

impl ConductorConfig {
    /// Reject values the worker cannot run with.
    pub fn validate(&self) -> Result<(), StreamkitError> {
        if self.retry_interval.is_zero() {
            return Err(StreamkitError::Config("retry_interval must be non-zero".into()));
        }
        if self.max_queued_messages == Some(0) {
            return Err(StreamkitError::Config(
                "max_queued_messages must be at least 1 (use None for unbounded)".into(),
            ));
        }
        Ok(())
    }
}

// ── EncodePath ───────────────────────────────────────────────────

/// Which encoder consumes captured frames. Fixed at construction; the
/// capturer never switches paths at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodePath {
    /// Frames reference the GPU staging texture directly.
    #[default]
    Hardware,
    /// Frames carry a CPU copy of the staging texture.
    Software,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ConductorConfig::default();
        assert_eq!(cfg.retry_interval, Duration::from_millis(500));
        assert!(cfg.max_queued_messages.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_interval_rejected() {
        let cfg = ConductorConfig {
            retry_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(StreamkitError::Config(_))));
    }

    #[test]
    fn zero_cap_rejected() {
        let cfg = ConductorConfig {
            max_queued_messages: Some(0),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
