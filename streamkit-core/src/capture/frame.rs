//! Frame types passed between the capturer and its sinks.
//!
//! A [`VideoFrame`] is produced once per capture call and consumed by
//! exactly one sink. Its backing storage is either the capturer's GPU
//! staging texture or an owned CPU buffer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::gpu::GpuTexture;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of a texture or raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (Direct3D swap chains).
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
        }
    }
}

// ── Fourcc ───────────────────────────────────────────────────────

/// Four-character code identifying a sample format.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fourcc(pub u32);

impl Fourcc {
    /// Already-encoded H.264 samples.
    pub const H264: Fourcc = Fourcc::from_bytes(*b"H264");
    /// Planar YUV 4:2:0.
    pub const I420: Fourcc = Fourcc::from_bytes(*b"I420");
    /// Packed 32-bit ARGB.
    pub const ARGB: Fourcc = Fourcc::from_bytes(*b"ARGB");

    pub const fn from_bytes(code: [u8; 4]) -> Self {
        Fourcc(u32::from_le_bytes(code))
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl std::fmt::Display for Fourcc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.to_bytes() {
            let c = if b.is_ascii_graphic() { b as char } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fourcc({self})")
    }
}

// ── Rotation ─────────────────────────────────────────────────────

/// Clockwise rotation a consumer must apply before display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

// ── CaptureFormat ────────────────────────────────────────────────

/// Format negotiated when capture starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    /// Time between frames.
    pub interval: Duration,
    pub fourcc: Fourcc,
}

impl CaptureFormat {
    /// An H.264 format at `fps` frames per second (clamped to 1..=240).
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        let fps = fps.clamp(1, 240);
        Self {
            width,
            height,
            interval: Duration::from_secs(1) / fps,
            fourcc: Fourcc::H264,
        }
    }

    /// Frames per second implied by `interval`.
    pub fn fps(&self) -> f64 {
        if self.interval.is_zero() {
            return 0.0;
        }
        1.0 / self.interval.as_secs_f64()
    }
}

// ── FrameBuffer ──────────────────────────────────────────────────

/// Backing storage of a [`VideoFrame`].
#[derive(Clone)]
pub enum FrameBuffer {
    /// The capturer's staging texture. Its contents are overwritten by
    /// the next capture, so sinks must consume it before returning.
    Texture(Arc<dyn GpuTexture>),
    /// CPU pixels owned by the frame: `height` rows of `stride` bytes.
    Raw {
        stride: u32,
        format: PixelFormat,
        data: Bytes,
    },
}

impl FrameBuffer {
    pub fn is_texture(&self) -> bool {
        matches!(self, FrameBuffer::Texture(_))
    }

    /// Raw pixel bytes, if this buffer lives on the CPU.
    pub fn raw_data(&self) -> Option<&Bytes> {
        match self {
            FrameBuffer::Raw { data, .. } => Some(data),
            FrameBuffer::Texture(_) => None,
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameBuffer::Texture(texture) => f
                .debug_tuple("Texture")
                .field(&texture.desc())
                .finish(),
            FrameBuffer::Raw {
                stride,
                format,
                data,
            } => f
                .debug_struct("Raw")
                .field("stride", stride)
                .field("format", format)
                .field("len", &data.len())
                .finish(),
        }
    }
}

// ── VideoFrame ───────────────────────────────────────────────────

/// One captured frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub buffer: FrameBuffer,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture instant.
    pub captured_at: Instant,
    /// Microseconds since the capturer's clock epoch.
    pub timestamp_us: u64,
    pub rotation: Rotation,
}

impl VideoFrame {
    /// A CPU frame with tightly packed rows.
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Bytes,
        timestamp_us: u64,
    ) -> Self {
        Self {
            buffer: FrameBuffer::Raw {
                stride: width * format.bytes_per_pixel() as u32,
                format,
                data,
            },
            width,
            height,
            captured_at: Instant::now(),
            timestamp_us,
            rotation: Rotation::Deg0,
        }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

// ── CaptureClock ─────────────────────────────────────────────────

/// Monotonic clock that stamps frames relative to its creation.
#[derive(Debug, Clone, Copy)]
pub struct CaptureClock {
    epoch: Instant,
}

impl CaptureClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Current instant and its offset from the epoch in microseconds.
    pub fn now(&self) -> (Instant, u64) {
        let now = Instant::now();
        let us = now.duration_since(self.epoch).as_micros();
        (now, u64::try_from(us).unwrap_or(u64::MAX))
    }
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::new()
    }
}
