//! CPU-backed GPU backend.
//!
//! Textures are plain byte buffers and "GPU copies" are memcpys. Used on
//! platforms without a Direct3D device and by the test suite, which relies
//! on its allocation and copy counters.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use super::gpu::{GpuContext, GpuDevice, GpuTexture, MappedTexture, TextureDesc};
use crate::error::CaptureError;

// ── SoftwareTexture ──────────────────────────────────────────────

/// A tightly packed texture in system memory.
pub struct SoftwareTexture {
    desc: TextureDesc,
    pixels: Mutex<Vec<u8>>,
}

impl SoftwareTexture {
    /// A zero-filled texture.
    pub fn new(desc: TextureDesc) -> Self {
        Self {
            desc,
            pixels: Mutex::new(vec![0; desc.byte_len()]),
        }
    }

    /// Replace the texture contents. `data` must be exactly `byte_len`.
    pub fn write(&self, data: &[u8]) -> Result<(), CaptureError> {
        let mut pixels = self.pixels.lock();
        if data.len() != pixels.len() {
            return Err(CaptureError::Copy(format!(
                "write of {} bytes into {}-byte texture",
                data.len(),
                pixels.len()
            )));
        }
        pixels.copy_from_slice(data);
        Ok(())
    }

    /// Mutate the pixels in place (render target use).
    pub fn with_pixels_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.pixels.lock())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.pixels.lock().clone()
    }
}

impl GpuTexture for SoftwareTexture {
    fn desc(&self) -> TextureDesc {
        self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn downcast<'a>(texture: &'a dyn GpuTexture, role: &'static str) -> Result<&'a SoftwareTexture, CaptureError> {
    texture
        .as_any()
        .downcast_ref::<SoftwareTexture>()
        .ok_or(CaptureError::IncompatibleTexture(role))
}

// ── SoftwareContext ──────────────────────────────────────────────

/// Immediate context of a [`SoftwareDevice`].
#[derive(Default)]
pub struct SoftwareContext {
    copies: AtomicUsize,
    fail_copies: AtomicBool,
}

impl SoftwareContext {
    /// Successful `copy_resource` calls so far.
    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    /// Make every subsequent copy fail.
    pub fn set_fail_copies(&self, fail: bool) {
        self.fail_copies.store(fail, Ordering::SeqCst);
    }
}

impl GpuContext for SoftwareContext {
    fn copy_resource(&self, dst: &dyn GpuTexture, src: &dyn GpuTexture) -> Result<(), CaptureError> {
        if self.fail_copies.load(Ordering::SeqCst) {
            return Err(CaptureError::Copy("device lost".into()));
        }
        let dst = downcast(dst, "copy destination is not a software texture")?;
        let src = downcast(src, "copy source is not a software texture")?;
        if dst.desc != src.desc {
            return Err(CaptureError::Copy(format!(
                "shape mismatch: {:?} -> {:?}",
                src.desc, dst.desc
            )));
        }
        if !std::ptr::eq(dst, src) {
            // Lock in address order so opposing copies cannot deadlock.
            let (mut dst_pixels, src_pixels) = if std::ptr::from_ref(dst) < std::ptr::from_ref(src) {
                let d = dst.pixels.lock();
                (d, src.pixels.lock())
            } else {
                let s = src.pixels.lock();
                (dst.pixels.lock(), s)
            };
            dst_pixels.copy_from_slice(&src_pixels);
        }
        self.copies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_texture(&self, texture: &dyn GpuTexture) -> Result<MappedTexture, CaptureError> {
        let texture = downcast(texture, "readback target is not a software texture")?;
        let data = Bytes::copy_from_slice(&texture.pixels.lock());
        Ok(MappedTexture {
            stride: texture.desc.row_bytes() as u32,
            data,
        })
    }
}

// ── SoftwareDevice ───────────────────────────────────────────────

/// Device whose textures live in system memory.
pub struct SoftwareDevice {
    context: Arc<SoftwareContext>,
    staging_allocations: AtomicUsize,
    fail_allocations: AtomicBool,
    multithread_protected: AtomicBool,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self {
            context: Arc::new(SoftwareContext::default()),
            staging_allocations: AtomicUsize::new(0),
            fail_allocations: AtomicBool::new(false),
            multithread_protected: AtomicBool::new(false),
        }
    }

    /// A render target for a producer to draw into. Not counted as a
    /// staging allocation.
    pub fn create_render_target(&self, desc: TextureDesc) -> Arc<SoftwareTexture> {
        Arc::new(SoftwareTexture::new(desc))
    }

    /// Concrete handle to the immediate context, for its counters.
    pub fn context(&self) -> &Arc<SoftwareContext> {
        &self.context
    }

    /// Staging textures allocated so far.
    pub fn staging_allocations(&self) -> usize {
        self.staging_allocations.load(Ordering::SeqCst)
    }

    /// Make every subsequent staging allocation fail.
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    pub fn is_multithread_protected(&self) -> bool {
        self.multithread_protected.load(Ordering::SeqCst)
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for SoftwareDevice {
    fn name(&self) -> &str {
        "software"
    }

    fn immediate_context(&self) -> Result<Arc<dyn GpuContext>, CaptureError> {
        Ok(self.context.clone())
    }

    fn create_staging_texture(&self, desc: TextureDesc) -> Result<Arc<dyn GpuTexture>, CaptureError> {
        if self.fail_allocations.load(Ordering::SeqCst) {
            return Err(CaptureError::TextureCreation(format!(
                "out of memory allocating {}x{}",
                desc.width, desc.height
            )));
        }
        self.staging_allocations.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SoftwareTexture::new(desc)))
    }

    fn enable_multithread_protection(&self) -> Result<(), CaptureError> {
        self.multithread_protected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
