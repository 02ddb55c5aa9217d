//! GPU abstraction used by the capture pipeline.
//!
//! The capturer only needs three things from a graphics API: allocate a
//! staging texture, copy one texture into another on the device's
//! immediate context, and optionally read a texture back to the CPU.
//! Backends implement [`GpuDevice`], [`GpuContext`] and [`GpuTexture`];
//! [`SoftwareDevice`](super::software::SoftwareDevice) is the portable one
//! and `D3d11Device` the Windows one.

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::info;

use super::frame::PixelFormat;
use crate::error::CaptureError;

// ── TextureDesc ──────────────────────────────────────────────────

/// Shape of a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Tightly packed row size in bytes.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Tightly packed image size in bytes.
    pub fn byte_len(&self) -> usize {
        self.row_bytes() * self.height as usize
    }
}

// ── Backend traits ───────────────────────────────────────────────

/// A device-resident 2D texture.
pub trait GpuTexture: Send + Sync + Any {
    fn desc(&self) -> TextureDesc;

    /// Backends downcast through this to reach their native handle.
    fn as_any(&self) -> &dyn Any;
}

/// CPU copy of a texture: `height` rows of `stride` bytes.
#[derive(Debug, Clone)]
pub struct MappedTexture {
    pub stride: u32,
    pub data: Bytes,
}

/// A device's command context.
pub trait GpuContext: Send + Sync {
    /// Copy the whole of `src` into `dst`. Both must have the same shape.
    fn copy_resource(&self, dst: &dyn GpuTexture, src: &dyn GpuTexture) -> Result<(), CaptureError>;

    /// Map `texture` for reading and copy its contents out.
    fn read_texture(&self, texture: &dyn GpuTexture) -> Result<MappedTexture, CaptureError>;
}

/// A graphics device.
pub trait GpuDevice: Send + Sync {
    /// Human-readable adapter name for logs.
    fn name(&self) -> &str;

    /// The device's immediate context.
    fn immediate_context(&self) -> Result<Arc<dyn GpuContext>, CaptureError>;

    /// Allocate a texture the capturer can copy into and read back.
    fn create_staging_texture(&self, desc: TextureDesc) -> Result<Arc<dyn GpuTexture>, CaptureError>;

    /// Serialise context access across threads, where the API needs it.
    fn enable_multithread_protection(&self) -> Result<(), CaptureError> {
        Ok(())
    }
}

// ── EncoderBinding ───────────────────────────────────────────────

#[derive(Default)]
struct BoundEncoder {
    device: Option<Arc<dyn GpuDevice>>,
    context: Option<Arc<dyn GpuContext>>,
}

/// The device and context the hardware encoder submits work on.
///
/// One binding is normally shared by the whole process and configured once
/// at startup, before the first frame; it is passed to each capturer
/// explicitly so tests can use their own.
#[derive(Default)]
pub struct EncoderBinding {
    bound: RwLock<BoundEncoder>,
}

impl EncoderBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_device(&self, device: Arc<dyn GpuDevice>) {
        info!(device = device.name(), "hardware encoder bound to device");
        self.bound.write().device = Some(device);
    }

    pub fn set_context(&self, context: Arc<dyn GpuContext>) {
        self.bound.write().context = Some(context);
    }

    pub fn device(&self) -> Option<Arc<dyn GpuDevice>> {
        self.bound.read().device.clone()
    }

    pub fn context(&self) -> Option<Arc<dyn GpuContext>> {
        self.bound.read().context.clone()
    }

    /// Both device and context are set.
    pub fn is_bound(&self) -> bool {
        let bound = self.bound.read();
        bound.device.is_some() && bound.context.is_some()
    }
}

impl std::fmt::Debug for EncoderBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = self.bound.read();
        f.debug_struct("EncoderBinding")
            .field("device", &bound.device.as_ref().map(|d| d.name().to_string()))
            .field("context", &bound.context.is_some())
            .finish()
    }
}
