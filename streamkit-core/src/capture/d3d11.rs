//! Direct3D 11 backend for the capture pipeline.
//!
//! Wraps an `ID3D11Device` and its immediate context. Staging textures
//! are created with `D3D11_USAGE_STAGING` and CPU read access so the
//! software encode path can map them.
//!
//! # Safety
//!
//! All unsafe FFI calls are confined to this module.

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};
use windows::{
    Win32::Graphics::{
        Direct3D::D3D_DRIVER_TYPE_HARDWARE,
        Direct3D11::*,
        Dxgi::{Common::*, *},
    },
    core::Interface,
};

use super::frame::PixelFormat;
use super::gpu::{GpuContext, GpuDevice, GpuTexture, MappedTexture, TextureDesc};
use crate::error::CaptureError;

fn to_dxgi(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::Bgra8 => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::Rgba8 => DXGI_FORMAT_R8G8B8A8_UNORM,
    }
}

fn from_dxgi(format: DXGI_FORMAT) -> Result<PixelFormat, CaptureError> {
    match format {
        DXGI_FORMAT_B8G8R8A8_UNORM => Ok(PixelFormat::Bgra8),
        DXGI_FORMAT_R8G8B8A8_UNORM => Ok(PixelFormat::Rgba8),
        _ => Err(CaptureError::Unsupported("texture format is not 8-bit RGBA/BGRA")),
    }
}

// ── D3d11Texture ─────────────────────────────────────────────────

/// A 2D texture owned by a Direct3D 11 device.
pub struct D3d11Texture {
    texture: ID3D11Texture2D,
    desc: TextureDesc,
}

// SAFETY: the capturer only touches textures through the immediate
// context, which is multithread-protected once `initialize` has run.
unsafe impl Send for D3d11Texture {}
// SAFETY: see above; `desc` is immutable after construction.
unsafe impl Sync for D3d11Texture {}

impl D3d11Texture {
    /// Wrap a texture created elsewhere, e.g. a swap-chain back buffer.
    pub fn from_raw(texture: ID3D11Texture2D) -> Result<Self, CaptureError> {
        let mut native = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut native) };
        let desc = TextureDesc::new(native.Width, native.Height, from_dxgi(native.Format)?);
        Ok(Self { texture, desc })
    }

    pub fn as_raw(&self) -> &ID3D11Texture2D {
        &self.texture
    }
}

impl GpuTexture for D3d11Texture {
    fn desc(&self) -> TextureDesc {
        self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn native<'a>(texture: &'a dyn GpuTexture, role: &'static str) -> Result<&'a ID3D11Texture2D, CaptureError> {
    texture
        .as_any()
        .downcast_ref::<D3d11Texture>()
        .map(D3d11Texture::as_raw)
        .ok_or(CaptureError::IncompatibleTexture(role))
}

// ── D3d11Context ─────────────────────────────────────────────────

/// The device's immediate context.
pub struct D3d11Context {
    context: ID3D11DeviceContext,
}

// SAFETY: calls are serialised by ID3D11Multithread protection, which
// `D3d11Device::enable_multithread_protection` turns on.
unsafe impl Send for D3d11Context {}
// SAFETY: see above.
unsafe impl Sync for D3d11Context {}

impl GpuContext for D3d11Context {
    fn copy_resource(&self, dst: &dyn GpuTexture, src: &dyn GpuTexture) -> Result<(), CaptureError> {
        if dst.desc() != src.desc() {
            return Err(CaptureError::Copy(format!(
                "shape mismatch: {:?} -> {:?}",
                src.desc(),
                dst.desc()
            )));
        }
        let dst = native(dst, "copy destination is not a D3D11 texture")?;
        let src = native(src, "copy source is not a D3D11 texture")?;
        unsafe { self.context.CopyResource(dst, src) };
        Ok(())
    }

    fn read_texture(&self, texture: &dyn GpuTexture) -> Result<MappedTexture, CaptureError> {
        let height = texture.desc().height as usize;
        let raw = native(texture, "readback target is not a D3D11 texture")?;

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(raw, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .map_err(|e| CaptureError::Readback(format!("Map failed: {e}")))?;
        }

        let stride = mapped.RowPitch;
        let total = stride as usize * height;
        let data = unsafe {
            let src = std::slice::from_raw_parts(mapped.pData as *const u8, total);
            Bytes::copy_from_slice(src)
        };
        unsafe { self.context.Unmap(raw, 0) };

        Ok(MappedTexture { stride, data })
    }
}

// ── D3d11Device ──────────────────────────────────────────────────

/// A hardware Direct3D 11 device.
pub struct D3d11Device {
    device: ID3D11Device,
    context: Arc<D3d11Context>,
    adapter: String,
}

// SAFETY: ID3D11Device methods are free-threaded.
unsafe impl Send for D3d11Device {}
// SAFETY: see above.
unsafe impl Sync for D3d11Device {}

impl D3d11Device {
    /// Create a device on the default hardware adapter.
    pub fn new() -> Result<Self, CaptureError> {
        let mut device = None;
        let mut context = None;
        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
            .map_err(|e| CaptureError::Device(format!("D3D11CreateDevice failed: {e}")))?;
        }
        let device = device.ok_or_else(|| CaptureError::Device("D3D11 device is None".into()))?;
        let context = context.ok_or_else(|| CaptureError::Device("D3D11 context is None".into()))?;
        Self::from_raw(device, context)
    }

    /// Wrap an existing device and its immediate context.
    pub fn from_raw(device: ID3D11Device, context: ID3D11DeviceContext) -> Result<Self, CaptureError> {
        let adapter = adapter_name(&device).unwrap_or_else(|| "direct3d11".to_string());
        info!(adapter = %adapter, "d3d11 device ready");
        Ok(Self {
            device,
            context: Arc::new(D3d11Context { context }),
            adapter,
        })
    }

    pub fn as_raw(&self) -> &ID3D11Device {
        &self.device
    }

    /// A texture the render loop can draw into and hand to the capturer.
    pub fn create_render_target(&self, desc: TextureDesc) -> Result<Arc<D3d11Texture>, CaptureError> {
        let native = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: to_dxgi(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        self.create_texture(&native, desc)
    }

    fn create_texture(
        &self,
        native: &D3D11_TEXTURE2D_DESC,
        desc: TextureDesc,
    ) -> Result<Arc<D3d11Texture>, CaptureError> {
        let mut texture = None;
        unsafe {
            self.device
                .CreateTexture2D(native, None, Some(&mut texture))
                .map_err(|e| CaptureError::TextureCreation(format!("CreateTexture2D failed: {e}")))?;
        }
        let texture =
            texture.ok_or_else(|| CaptureError::TextureCreation("CreateTexture2D returned no texture".into()))?;
        Ok(Arc::new(D3d11Texture { texture, desc }))
    }
}

fn adapter_name(device: &ID3D11Device) -> Option<String> {
    let dxgi: IDXGIDevice = device.cast().ok()?;
    let adapter = unsafe { dxgi.GetAdapter() }.ok()?;
    let desc = unsafe { adapter.GetDesc() }.ok()?;
    let len = desc
        .Description
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(desc.Description.len());
    Some(String::from_utf16_lossy(&desc.Description[..len]))
}

impl GpuDevice for D3d11Device {
    fn name(&self) -> &str {
        &self.adapter
    }

    fn immediate_context(&self) -> Result<Arc<dyn GpuContext>, CaptureError> {
        Ok(self.context.clone())
    }

    fn create_staging_texture(&self, desc: TextureDesc) -> Result<Arc<dyn GpuTexture>, CaptureError> {
        let native = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: to_dxgi(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
        };
        debug!(width = desc.width, height = desc.height, "creating d3d11 staging texture");
        let texture: Arc<dyn GpuTexture> = self.create_texture(&native, desc)?;
        Ok(texture)
    }

    fn enable_multithread_protection(&self) -> Result<(), CaptureError> {
        let multithread: ID3D11Multithread = self
            .context
            .context
            .cast()
            .map_err(|e| CaptureError::Device(format!("ID3D11Multithread unavailable: {e}")))?;
        unsafe {
            let _ = multithread.SetMultithreadProtected(true);
        }
        Ok(())
    }
}
