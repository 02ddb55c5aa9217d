//! Domain-specific error types for streamkit.
//!
//! Fallible operations return `Result<T, StreamkitError>` or, inside the
//! capture pipeline, `Result<T, CaptureError>`. Relay send failures are not
//! errors at all: they are retried by the conductor and never surfaced.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for streamkit.
#[derive(Debug, Error)]
pub enum StreamkitError {
    // ── Conductor Errors ─────────────────────────────────────────
    /// The conductor worker has shut down and no longer accepts messages.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Configuration Errors ─────────────────────────────────────
    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),

    // ── Capture Errors ───────────────────────────────────────────
    /// The capture pipeline failed.
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── CaptureError ──────────────────────────────────────────────────

/// Typed error for the frame-capture pipeline.
///
/// Every GPU failure is scoped to a single frame: the caller drops that
/// frame and keeps rendering.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// `send_texture` was called before `initialize`.
    #[error("capturer not initialized: call initialize() before sending frames")]
    NotInitialized,

    /// A sink wants observer is already registered.
    #[error("sink wants observer already registered")]
    ObserverAlreadySet,

    /// The graphics device or one of its interfaces could not be obtained.
    #[error("device error: {0}")]
    Device(String),

    /// The device could not allocate a texture.
    #[error("texture creation failed: {0}")]
    TextureCreation(String),

    /// The GPU-side resource copy failed.
    #[error("resource copy failed: {0}")]
    Copy(String),

    /// Mapping a staging texture for CPU read failed.
    #[error("texture readback failed: {0}")]
    Readback(String),

    /// A texture from a different backend was handed to a device.
    #[error("incompatible texture: {0}")]
    IncompatibleTexture(&'static str),

    /// The operation is not available on this platform.
    #[error("not supported: {0}")]
    Unsupported(&'static str),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for StreamkitError {
    fn from(s: String) -> Self {
        StreamkitError::Other(s)
    }
}

impl From<&str> for StreamkitError {
    fn from(s: &str) -> Self {
        StreamkitError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for StreamkitError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        StreamkitError::ChannelClosed
    }
}
