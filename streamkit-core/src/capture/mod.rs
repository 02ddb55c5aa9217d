//! Frame capture pipeline.
//!
//! - [`capturer`]: the `FrameCapturer` capability and the shared
//!   sink/observer/run-state base.
//! - [`gpu_capturer`]: render-target capture through a reusable staging
//!   texture.
//! - [`gpu`]: backend traits and the encoder binding.
//! - [`software`]: portable CPU backend.
//! - `d3d11`: Direct3D 11 backend (Windows only).

pub mod capturer;
#[cfg(target_os = "windows")]
pub mod d3d11;
pub mod frame;
pub mod gpu;
pub mod gpu_capturer;
pub mod sink;
pub mod software;

pub use capturer::{BufferCapturer, CaptureState, FrameCapturer, FrameDisposition};
#[cfg(target_os = "windows")]
pub use d3d11::{D3d11Context, D3d11Device, D3d11Texture};
pub use frame::{CaptureClock, CaptureFormat, FrameBuffer, Fourcc, PixelFormat, Rotation, VideoFrame};
pub use gpu::{EncoderBinding, GpuContext, GpuDevice, GpuTexture, MappedTexture, TextureDesc};
pub use gpu_capturer::{GpuFrameCapturer, StagingBuffer};
pub use sink::{SinkWants, SinkWantsObserver, VideoSink};
pub use software::{SoftwareContext, SoftwareDevice, SoftwareTexture};
