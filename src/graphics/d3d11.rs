/*!
 * Direct3D 11 Shared-Texture Device
 *
 * `GpuDevice` implementation backing the encode pipeline on Windows.
 * Creates NV12 render-target textures with the shared-resource flag and
 * exports their DXGI shared handles so hardware encoders in other
 * subsystems can open the same surface by id.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use windows::core::*;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_RESOURCE_MISC_SHARED, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_NV12, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::IDXGIResource;

use super::{GpuDevice, SharedTextureId, SharedTexturePair, TextureHandle};

/// Direct3D 11 device that owns the pooled encode textures.
///
/// Textures are tracked in a handle table; the pipeline holds only opaque
/// `TextureHandle`s. The luma and chroma handles of one pair reference the
/// same NV12 resource, so the resource is released once both handles have
/// been destroyed.
pub struct D3d11Device {
    device: ID3D11Device,
    _context: ID3D11DeviceContext,
    textures: Mutex<HashMap<u64, ID3D11Texture2D>>,
    next_handle: AtomicU64,
}

// The D3D11 device is free-threaded; the handle table has its own lock and
// the immediate context is never used off the owning thread.
unsafe impl Send for D3d11Device {}
unsafe impl Sync for D3d11Device {}

impl D3d11Device {
    /// Create a hardware D3D11 device for encode-texture allocation.
    pub fn new() -> Result<Self> {
        let (device, context) = Self::create_d3d_device()?;
        info!("D3D11 encode-texture device initialized");

        Ok(Self {
            device,
            _context: context,
            textures: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    fn create_d3d_device() -> Result<(ID3D11Device, ID3D11DeviceContext)> {
        unsafe {
            let mut device = None;
            let mut context = None;

            D3D11CreateDevice(
                None, // Adapter (None = default)
                D3D_DRIVER_TYPE_HARDWARE,
                None, // Software rasterizer (None for hardware)
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None, // Feature levels (None = default)
                D3D11_SDK_VERSION,
                Some(&mut device),
                None, // Feature level out
                Some(&mut context),
            )
            .context("D3D11CreateDevice failed")?;

            let device = device.context("Device creation failed")?;
            let context = context.context("Context creation failed")?;

            Ok((device, context))
        }
    }

    fn register(&self, texture: ID3D11Texture2D) -> TextureHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.textures.lock().insert(raw, texture);
        TextureHandle::from_raw(raw)
    }
}

impl GpuDevice for D3d11Device {
    fn create_shared_texture_pair(&self, width: u32, height: u32) -> Result<SharedTexturePair> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_NV12,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: D3D11_RESOURCE_MISC_SHARED.0 as u32,
        };

        let texture = unsafe {
            let mut texture = None;
            self.device
                .CreateTexture2D(&desc, None, Some(&mut texture))
                .context("CreateTexture2D (NV12 shared) failed")?;
            texture.context("CreateTexture2D returned no texture")?
        };

        let dxgi_resource: IDXGIResource = texture
            .cast()
            .context("Failed to cast texture to IDXGIResource")?;
        let shared = unsafe { dxgi_resource.GetSharedHandle() }
            .context("GetSharedHandle failed for encode texture")?;

        // Both plane handles reference the same NV12 resource; the COM
        // reference is released once both are destroyed.
        let chroma_texture = texture.clone();
        let luma = self.register(texture);
        let chroma = self.register(chroma_texture);
        let shared_id = SharedTextureId(shared.0 as u64);

        debug!(
            "Created {}x{} NV12 shared texture (id {:#x})",
            width, height, shared_id.0
        );

        Ok(SharedTexturePair {
            luma,
            chroma,
            shared_id,
        })
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        if texture.is_null() {
            return;
        }
        self.textures.lock().remove(&texture.as_raw());
    }
}
