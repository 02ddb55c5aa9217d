//! The frame-capturer capability and its shared-state base.
//!
//! A capturer has one sink slot, not a list: adding a sink replaces the
//! previous one. With no sink attached, frames loop back into the
//! capturer's own ingestion path, where loopback subscribers can observe
//! them.
//!
//! ```text
//!  Stopped ──start──► Running ──stop──► Stopped
//!     (sink / observer changes accepted in both states;
//!      send_frame is a no-op while Stopped)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use super::frame::{CaptureFormat, Fourcc, VideoFrame};
use super::sink::{SinkWants, SinkWantsObserver, VideoSink, same_sink};
use crate::config::EncodePath;
use crate::error::CaptureError;

/// Loopback frames buffered per slow subscriber before it lags.
const LOOPBACK_CAPACITY: usize = 4;

// ── Public types ─────────────────────────────────────────────────

/// Capture lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Running,
}

/// Where a frame handed to the capturer ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Delivered to the active sink.
    Delivered,
    /// No sink attached; consumed by the loopback path.
    LoopedBack,
    /// The capturer was stopped; nothing happened.
    Skipped,
}

// ── FrameCapturer ────────────────────────────────────────────────

/// Capability shared by every capturer.
pub trait FrameCapturer: Send + Sync {
    /// Record `format`, select the configured encode path, and start.
    fn start(&self, format: CaptureFormat) -> CaptureState;

    /// Stop; later frames are ignored until the next `start`.
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// The format passed to the most recent `start`.
    fn capture_format(&self) -> Option<CaptureFormat>;

    fn is_screencast(&self) -> bool {
        false
    }

    /// Register the single wants observer. A second registration fails
    /// with [`CaptureError::ObserverAlreadySet`].
    fn set_sink_wants_observer(&self, observer: Arc<dyn SinkWantsObserver>) -> Result<(), CaptureError>;

    /// Make `sink` the active sink, replacing any previous one, and tell
    /// the observer about `wants`.
    fn add_or_update_sink(&self, sink: Arc<dyn VideoSink>, wants: SinkWants);

    /// Clear the active sink. The argument is not checked against the
    /// active sink: whatever is attached gets detached.
    fn remove_sink(&self, sink: &Arc<dyn VideoSink>);

    /// Whether `sink` is the one currently attached.
    fn is_active_sink(&self, sink: &Arc<dyn VideoSink>) -> bool;

    /// Output formats this capturer produces, most preferred first. Our
    /// consumers expect compressed samples, so this is H.264 only.
    fn preferred_fourccs(&self) -> Vec<Fourcc> {
        vec![Fourcc::H264]
    }

    /// Route `frame` to the sink, or to loopback if none is attached.
    fn send_frame(&self, frame: VideoFrame) -> FrameDisposition;
}

// ── BufferCapturer ───────────────────────────────────────────────

/// State guarded by the capturer's single lock. `ext` carries whatever a
/// concrete capturer needs under the same critical section.
pub(crate) struct CapturerState<E> {
    pub(crate) running: bool,
    pub(crate) format: Option<CaptureFormat>,
    pub(crate) active_path: EncodePath,
    pub(crate) sink: Option<Arc<dyn VideoSink>>,
    pub(crate) wants: SinkWants,
    pub(crate) observer: Option<Arc<dyn SinkWantsObserver>>,
    pub(crate) ext: E,
}

/// Base capturer: sink slot, wants observer, run state, loopback.
///
/// One mutex covers all shared state, and it is held across the running
/// check and the dispatch so a concurrent `stop` cannot interleave.
pub struct BufferCapturer<E = ()> {
    state: Mutex<CapturerState<E>>,
    encode_path: EncodePath,
    loopback: broadcast::Sender<VideoFrame>,
    loopback_frames: AtomicU64,
    delivered_frames: AtomicU64,
}

impl BufferCapturer<()> {
    pub fn new(encode_path: EncodePath) -> Self {
        Self::with_extension(encode_path, ())
    }
}

impl<E> BufferCapturer<E> {
    pub(crate) fn with_extension(encode_path: EncodePath, ext: E) -> Self {
        let (loopback, _) = broadcast::channel(LOOPBACK_CAPACITY);
        Self {
            state: Mutex::new(CapturerState {
                running: false,
                format: None,
                active_path: encode_path,
                sink: None,
                wants: SinkWants::default(),
                observer: None,
                ext,
            }),
            encode_path,
            loopback,
            loopback_frames: AtomicU64::new(0),
            delivered_frames: AtomicU64::new(0),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CapturerState<E>> {
        self.state.lock()
    }

    /// Deliver `frame` under an already-held lock.
    pub(crate) fn dispatch(&self, state: &CapturerState<E>, frame: VideoFrame) -> FrameDisposition {
        match &state.sink {
            Some(sink) => {
                sink.on_frame(&frame);
                self.delivered_frames.fetch_add(1, Ordering::Relaxed);
                FrameDisposition::Delivered
            }
            None => {
                self.ingest(frame);
                FrameDisposition::LoopedBack
            }
        }
    }

    /// The capturer's own ingestion path.
    fn ingest(&self, frame: VideoFrame) {
        let n = self.loopback_frames.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(width = frame.width, height = frame.height, loopback_frames = n, "frame looped back");
        // No subscribers is the common case.
        let _ = self.loopback.send(frame);
    }

    /// Observe frames that reach the loopback path.
    pub fn subscribe_loopback(&self) -> broadcast::Receiver<VideoFrame> {
        self.loopback.subscribe()
    }

    /// Frames consumed by the loopback path so far.
    pub fn loopback_frames(&self) -> u64 {
        self.loopback_frames.load(Ordering::Relaxed)
    }

    /// Frames delivered to a sink so far.
    pub fn delivered_frames(&self) -> u64 {
        self.delivered_frames.load(Ordering::Relaxed)
    }

    /// The encode path configured for this capturer.
    pub fn encode_path(&self) -> EncodePath {
        self.encode_path
    }

    /// The wants most recently declared by the active sink.
    pub fn sink_wants(&self) -> SinkWants {
        self.state.lock().wants.clone()
    }

    /// Detach `sink` only if it is the one attached, checking and clearing
    /// under one lock. Returns whether it was removed.
    pub fn remove_sink_if_active(&self, sink: &Arc<dyn VideoSink>) -> bool {
        let mut state = self.state.lock();
        if !state.sink.as_ref().is_some_and(|active| same_sink(active, sink)) {
            return false;
        }
        state.sink = None;
        state.wants = SinkWants::default();
        true
    }
}

impl<E: Send> FrameCapturer for BufferCapturer<E> {
    fn start(&self, format: CaptureFormat) -> CaptureState {
        let mut state = self.state.lock();
        state.format = Some(format);
        state.active_path = self.encode_path;
        state.running = true;
        info!(
            width = format.width,
            height = format.height,
            fps = format.fps(),
            fourcc = %format.fourcc,
            path = ?state.active_path,
            "capture started"
        );
        CaptureState::Running
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if state.running {
            info!("capture stopped");
        }
        state.running = false;
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn capture_format(&self) -> Option<CaptureFormat> {
        self.state.lock().format
    }

    fn set_sink_wants_observer(&self, observer: Arc<dyn SinkWantsObserver>) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.observer.is_some() {
            return Err(CaptureError::ObserverAlreadySet);
        }
        state.observer = Some(observer);
        Ok(())
    }

    fn add_or_update_sink(&self, sink: Arc<dyn VideoSink>, wants: SinkWants) {
        let mut state = self.state.lock();
        if let Some(observer) = &state.observer {
            observer.on_sink_wants_changed(&sink, &wants);
        }
        debug!(?wants, replaced = state.sink.is_some(), "sink attached");
        state.sink = Some(sink);
        state.wants = wants;
    }

    fn remove_sink(&self, sink: &Arc<dyn VideoSink>) {
        let mut state = self.state.lock();
        if state
            .sink
            .as_ref()
            .is_some_and(|active| !same_sink(active, sink))
        {
            debug!("remove_sink called with a sink that is not attached; clearing anyway");
        }
        state.sink = None;
        state.wants = SinkWants::default();
    }

    fn is_active_sink(&self, sink: &Arc<dyn VideoSink>) -> bool {
        self.state
            .lock()
            .sink
            .as_ref()
            .is_some_and(|active| same_sink(active, sink))
    }

    fn send_frame(&self, frame: VideoFrame) -> FrameDisposition {
        let state = self.state.lock();
        if !state.running {
            return FrameDisposition::Skipped;
        }
        self.dispatch(&state, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::PixelFormat;
    use bytes::Bytes;

    #[derive(Default)]
    struct CountingSink {
        frames: AtomicU64,
    }

    impl VideoSink for CountingSink {
        fn on_frame(&self, _frame: &VideoFrame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingSink {
        fn count(&self) -> u64 {
            self.frames.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct WantsLog(Mutex<Vec<SinkWants>>);

    impl SinkWantsObserver for WantsLog {
        fn on_sink_wants_changed(&self, _sink: &Arc<dyn VideoSink>, wants: &SinkWants) {
            self.0.lock().push(wants.clone());
        }
    }

    fn frame() -> VideoFrame {
        VideoFrame::from_raw(2, 2, PixelFormat::Bgra8, Bytes::from(vec![0u8; 16]), 0)
    }

    fn running() -> BufferCapturer {
        let capturer = BufferCapturer::new(EncodePath::Hardware);
        assert_eq!(capturer.start(CaptureFormat::new(2, 2, 30)), CaptureState::Running);
        capturer
    }

    #[test]
    fn starts_stopped() {
        let capturer = BufferCapturer::new(EncodePath::Hardware);
        assert!(!capturer.is_running());
        assert!(capturer.capture_format().is_none());
        assert!(!capturer.is_screencast());
        assert_eq!(capturer.send_frame(frame()), FrameDisposition::Skipped);
    }

    #[test]
    fn preferred_fourcc_is_h264_only() {
        let capturer = BufferCapturer::new(EncodePath::Software);
        assert_eq!(capturer.preferred_fourccs(), vec![Fourcc::H264]);
    }

    #[test]
    fn stopped_capturer_never_touches_sink() {
        let capturer = running();
        let sink = Arc::new(CountingSink::default());
        capturer.add_or_update_sink(sink.clone(), SinkWants::default());
        capturer.stop();

        assert_eq!(capturer.send_frame(frame()), FrameDisposition::Skipped);
        assert_eq!(sink.count(), 0);
        assert_eq!(capturer.loopback_frames(), 0);

        capturer.start(CaptureFormat::new(2, 2, 30));
        assert_eq!(capturer.send_frame(frame()), FrameDisposition::Delivered);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn replacing_sink_redirects_frames() {
        let capturer = running();
        let a = Arc::new(CountingSink::default());
        let b = Arc::new(CountingSink::default());
        capturer.add_or_update_sink(a.clone(), SinkWants::default());
        capturer.add_or_update_sink(b.clone(), SinkWants::default());

        capturer.send_frame(frame());
        assert_eq!(a.count(), 0);
        assert_eq!(b.count(), 1);
        assert_eq!(capturer.delivered_frames(), 1);
    }

    #[test]
    fn remove_sink_falls_back_to_loopback() {
        let capturer = running();
        let mut loopback = capturer.subscribe_loopback();
        let a = Arc::new(CountingSink::default());
        let a_dyn: Arc<dyn VideoSink> = a.clone();
        capturer.add_or_update_sink(a_dyn.clone(), SinkWants::default());
        capturer.remove_sink(&a_dyn);

        assert_eq!(capturer.send_frame(frame()), FrameDisposition::LoopedBack);
        assert_eq!(a.count(), 0);
        assert_eq!(capturer.loopback_frames(), 1);
        assert_eq!(loopback.try_recv().unwrap().width, 2);
    }

    #[test]
    fn remove_sink_clears_regardless_of_identity() {
        let capturer = running();
        let a: Arc<dyn VideoSink> = Arc::new(CountingSink::default());
        let b: Arc<dyn VideoSink> = Arc::new(CountingSink::default());
        capturer.add_or_update_sink(a.clone(), SinkWants::default());
        assert!(capturer.is_active_sink(&a));
        assert!(!capturer.is_active_sink(&b));

        capturer.remove_sink(&b);
        assert!(!capturer.is_active_sink(&a));
        assert_eq!(capturer.send_frame(frame()), FrameDisposition::LoopedBack);
    }

    #[test]
    fn remove_sink_if_active_keeps_other_sink() {
        let capturer = running();
        let a: Arc<dyn VideoSink> = Arc::new(CountingSink::default());
        let b: Arc<dyn VideoSink> = Arc::new(CountingSink::default());
        capturer.add_or_update_sink(a.clone(), SinkWants::default());
        capturer.add_or_update_sink(b.clone(), SinkWants::default());

        assert!(!capturer.remove_sink_if_active(&a));
        assert!(capturer.is_active_sink(&b));
        assert_eq!(capturer.send_frame(frame()), FrameDisposition::Delivered);

        assert!(capturer.remove_sink_if_active(&b));
        assert!(!capturer.remove_sink_if_active(&b));
        assert_eq!(capturer.send_frame(frame()), FrameDisposition::LoopedBack);
    }

    #[test]
    fn observer_sees_new_wants() {
        let capturer = BufferCapturer::new(EncodePath::Hardware);
        let log = Arc::new(WantsLog::default());
        capturer.set_sink_wants_observer(log.clone()).unwrap();

        let wants = SinkWants {
            max_framerate_fps: Some(30),
            ..Default::default()
        };
        capturer.add_or_update_sink(Arc::new(CountingSink::default()), wants.clone());
        assert_eq!(*log.0.lock(), vec![wants.clone()]);
        assert_eq!(capturer.sink_wants(), wants);
    }

    #[test]
    fn second_observer_is_rejected() {
        let capturer = BufferCapturer::new(EncodePath::Hardware);
        capturer.set_sink_wants_observer(Arc::new(WantsLog::default())).unwrap();
        let err = capturer
            .set_sink_wants_observer(Arc::new(WantsLog::default()))
            .unwrap_err();
        assert!(matches!(err, CaptureError::ObserverAlreadySet));
    }

    #[test]
    fn start_records_format_and_path() {
        let capturer = BufferCapturer::new(EncodePath::Software);
        let fmt = CaptureFormat::new(1920, 1080, 60);
        capturer.start(fmt);
        assert_eq!(capturer.capture_format(), Some(fmt));
        assert_eq!(capturer.encode_path(), EncodePath::Software);
        assert_eq!(capturer.lock().active_path, EncodePath::Software);
    }
}
