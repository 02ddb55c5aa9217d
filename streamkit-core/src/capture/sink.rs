//! Frame consumers and their declared preferences.

use std::sync::Arc;

use super::frame::VideoFrame;

/// Consumer of captured frames, typically an encoder stage.
///
/// `on_frame` runs with the capturer's state lock held: implementations
/// must not call back into the capturer (attaching or removing sinks
/// included) and should return quickly.
pub trait VideoSink: Send + Sync {
    fn on_frame(&self, frame: &VideoFrame);
}

/// Resolution and frame-rate preferences a sink declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkWants {
    /// The sink applies rotation itself.
    pub rotation_applied: bool,
    /// Replace content with black frames.
    pub black_frames: bool,
    pub max_pixel_count: Option<u32>,
    pub target_pixel_count: Option<u32>,
    pub max_framerate_fps: Option<u32>,
}

impl SinkWants {
    /// Whether a `width`x`height` frame is within `max_pixel_count`.
    pub fn accepts_resolution(&self, width: u32, height: u32) -> bool {
        match self.max_pixel_count {
            Some(max) => u64::from(width) * u64::from(height) <= u64::from(max),
            None => true,
        }
    }
}

/// Notified whenever the active sink or its wants change.
///
/// Called with the capturer's state lock held: implementations must not
/// call back into the capturer.
pub trait SinkWantsObserver: Send + Sync {
    fn on_sink_wants_changed(&self, sink: &Arc<dyn VideoSink>, wants: &SinkWants);
}

/// Pointer identity for sinks, ignoring vtables.
pub(crate) fn same_sink(a: &Arc<dyn VideoSink>, b: &Arc<dyn VideoSink>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
