//! GPU render-target capturer.
//!
//! Turns a shared render-target texture into frames for the active sink:
//!
//! 1. Inspect the source texture's shape.
//! 2. Reuse the cached staging texture, or (re)allocate it when the shape
//!    changed since the last capture.
//! 3. Copy source → staging on the immediate context.
//! 4. Wrap staging in a [`VideoFrame`] stamped with the capture time.
//! 5. Dispatch to the sink, or to loopback when none is attached.
//!
//! Steady-state capture never allocates. The whole sequence runs under the
//! capturer's state lock, so `stop` cannot land between the running check
//! and the dispatch.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::capturer::{BufferCapturer, CaptureState, FrameCapturer, FrameDisposition};
use super::frame::{CaptureClock, CaptureFormat, FrameBuffer, Rotation, VideoFrame};
use super::gpu::{EncoderBinding, GpuContext, GpuDevice, GpuTexture, TextureDesc};
use super::sink::{SinkWants, SinkWantsObserver, VideoSink};
use crate::config::EncodePath;
use crate::error::CaptureError;

// ── StagingBuffer ────────────────────────────────────────────────

/// The cached copy target, tagged with the shape it was allocated for.
pub struct StagingBuffer {
    texture: Arc<dyn GpuTexture>,
    desc: TextureDesc,
}

impl StagingBuffer {
    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    pub fn texture(&self) -> &Arc<dyn GpuTexture> {
        &self.texture
    }
}

// ── GpuFrameCapturer ─────────────────────────────────────────────

/// Capturer fed with GPU textures by a render loop.
pub struct GpuFrameCapturer {
    base: BufferCapturer<Option<StagingBuffer>>,
    device: Arc<dyn GpuDevice>,
    binding: Arc<EncoderBinding>,
    context: RwLock<Option<Arc<dyn GpuContext>>>,
    clock: CaptureClock,
}

impl GpuFrameCapturer {
    pub fn new(device: Arc<dyn GpuDevice>, binding: Arc<EncoderBinding>, encode_path: EncodePath) -> Self {
        Self {
            base: BufferCapturer::with_extension(encode_path, None),
            device,
            binding,
            context: RwLock::new(None),
            clock: CaptureClock::new(),
        }
    }

    /// Fetch the device's immediate context and bind device and context
    /// into the encoder binding.
    ///
    /// Call once at startup, before the first `send_texture`. Initializing
    /// two capturers that share a binding with different devices leaves
    /// the binding pointing at whichever ran last.
    pub fn initialize(&self) -> Result<(), CaptureError> {
        let context = self.device.immediate_context()?;
        self.device.enable_multithread_protection()?;

        self.binding.set_device(Arc::clone(&self.device));
        self.binding.set_context(Arc::clone(&context));
        *self.context.write() = Some(context);

        info!(device = self.device.name(), "gpu capturer initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.context.read().is_some()
    }

    /// Capture `source` and dispatch the resulting frame.
    ///
    /// Returns [`FrameDisposition::Skipped`] while stopped. A GPU failure
    /// drops this frame only; the capturer stays usable.
    pub fn send_texture(&self, source: &dyn GpuTexture) -> Result<FrameDisposition, CaptureError> {
        let mut guard = self.base.lock();
        let state = &mut *guard;
        if !state.running {
            return Ok(FrameDisposition::Skipped);
        }

        let context = self
            .context
            .read()
            .clone()
            .ok_or(CaptureError::NotInitialized)?;

        let desc = source.desc();
        let staging = self.staging_for(&mut state.ext, desc)?;
        context.copy_resource(&*staging.texture, source)?;

        let buffer = match state.active_path {
            EncodePath::Hardware => FrameBuffer::Texture(Arc::clone(&staging.texture)),
            EncodePath::Software => {
                let mapped = context.read_texture(&*staging.texture)?;
                FrameBuffer::Raw {
                    stride: mapped.stride,
                    format: desc.format,
                    data: mapped.data,
                }
            }
        };

        let (captured_at, timestamp_us) = self.clock.now();
        let frame = VideoFrame {
            buffer,
            width: desc.width,
            height: desc.height,
            captured_at,
            timestamp_us,
            rotation: Rotation::Deg0,
        };

        Ok(self.base.dispatch(state, frame))
    }

    /// The staging buffer for `desc`: the cached one if its shape matches,
    /// otherwise a fresh allocation that replaces it.
    fn staging_for<'a>(
        &self,
        slot: &'a mut Option<StagingBuffer>,
        desc: TextureDesc,
    ) -> Result<&'a mut StagingBuffer, CaptureError> {
        match slot.take() {
            Some(existing) if existing.desc == desc => Ok(slot.insert(existing)),
            previous => {
                match &previous {
                    Some(old) => debug!(
                        old_width = old.desc.width,
                        old_height = old.desc.height,
                        width = desc.width,
                        height = desc.height,
                        "source shape changed; reallocating staging texture"
                    ),
                    None => debug!(width = desc.width, height = desc.height, "allocating staging texture"),
                }
                drop(previous);
                let texture = self.device.create_staging_texture(desc)?;
                Ok(slot.insert(StagingBuffer { texture, desc }))
            }
        }
    }

    /// Shape of the cached staging texture, if one has been allocated.
    pub fn staging_desc(&self) -> Option<TextureDesc> {
        self.base.lock().ext.as_ref().map(StagingBuffer::desc)
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn subscribe_loopback(&self) -> broadcast::Receiver<VideoFrame> {
        self.base.subscribe_loopback()
    }

    pub fn loopback_frames(&self) -> u64 {
        self.base.loopback_frames()
    }

    pub fn delivered_frames(&self) -> u64 {
        self.base.delivered_frames()
    }

    pub fn encode_path(&self) -> EncodePath {
        self.base.encode_path()
    }

    /// See [`BufferCapturer::remove_sink_if_active`].
    pub fn remove_sink_if_active(&self, sink: &Arc<dyn VideoSink>) -> bool {
        self.base.remove_sink_if_active(sink)
    }
}

impl FrameCapturer for GpuFrameCapturer {
    fn start(&self, format: CaptureFormat) -> CaptureState {
        self.base.start(format)
    }

    fn stop(&self) {
        self.base.stop();
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }

    fn capture_format(&self) -> Option<CaptureFormat> {
        self.base.capture_format()
    }

    fn set_sink_wants_observer(&self, observer: Arc<dyn SinkWantsObserver>) -> Result<(), CaptureError> {
        self.base.set_sink_wants_observer(observer)
    }

    fn add_or_update_sink(&self, sink: Arc<dyn VideoSink>, wants: SinkWants) {
        self.base.add_or_update_sink(sink, wants);
    }

    fn remove_sink(&self, sink: &Arc<dyn VideoSink>) {
        self.base.remove_sink(sink);
    }

    fn is_active_sink(&self, sink: &Arc<dyn VideoSink>) -> bool {
        self.base.is_active_sink(sink)
    }

    fn send_frame(&self, frame: VideoFrame) -> FrameDisposition {
        self.base.send_frame(frame)
    }
}
