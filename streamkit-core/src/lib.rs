//! # streamkit-core
//!
//! Building blocks for a multi-peer streaming host.
//!
//! This crate contains:
//! - **Signaling**: `SignalingChannel` / `SignalingObserver` relay seams and
//!   the in-process `LocalRelay`
//! - **Peer**: `PeerSession`, `PeerSessionFactory`, `PeerLink` and the
//!   `PeerRegistry`
//! - **Conductor**: `Conductor`, which creates and removes sessions on relay
//!   events and delivers their signaling through a retrying FIFO
//! - **Capture**: `GpuFrameCapturer`, which turns render-target textures
//!   into frames for a single sink, plus GPU backend traits
//! - **Config**: `RtcConfig`, `ConductorConfig`, `EncodePath`
//! - **Error**: `StreamkitError` and `CaptureError`, `thiserror`-based

pub mod capture;
pub mod conductor;
pub mod config;
pub mod error;
pub mod peer;
pub mod signaling;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{
    CaptureFormat, EncoderBinding, FrameCapturer, FrameDisposition, GpuDevice, GpuFrameCapturer,
    SinkWants, VideoFrame, VideoSink,
};
pub use conductor::Conductor;
pub use config::{ConductorConfig, EncodePath, OverflowPolicy, RtcConfig};
pub use error::{CaptureError, StreamkitError};
pub use peer::{
    IceConnectionState, PeerLink, PeerRegistry, PeerSession, PeerSessionContext, PeerSessionFactory,
};
pub use signaling::{LocalRelay, PeerId, SignalingChannel, SignalingObserver};
