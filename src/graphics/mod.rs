/*!
 * Graphics Device Seam
 *
 * The encode pipeline never talks to a graphics API directly. It consumes
 * shared-texture primitives through the `GpuDevice` trait and tracks
 * textures by opaque handles. The Direct3D 11 implementation lives in
 * `d3d11`; tests use the mock device.
 */

use anyhow::Result;

#[cfg(windows)]
pub mod d3d11;

#[cfg(test)]
pub(crate) mod mock;

/// Opaque handle to one GPU texture owned by a `GpuDevice`.
///
/// The pipeline never dereferences a handle; it only moves handles between
/// pool collections and passes them back to the device for destruction at
/// teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(u64);

impl TextureHandle {
    /// The null handle. Accepted (and ignored) by `destroy_texture`.
    pub const NULL: TextureHandle = TextureHandle(0);

    pub fn from_raw(raw: u64) -> Self {
        TextureHandle(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Cross-subsystem identifier for a shared GPU texture.
///
/// Downstream consumers (encoders, other processes) reference the texture by
/// this numeric id without holding the owning object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedTextureId(pub u64);

/// One NV12 encode target: luma plane, chroma plane, and the shareable id
/// of the primary texture.
#[derive(Debug, Clone, Copy)]
pub struct SharedTexturePair {
    pub luma: TextureHandle,
    pub chroma: TextureHandle,
    pub shared_id: SharedTextureId,
}

/// Graphics collaborator consumed by the pipeline.
pub trait GpuDevice: Send + Sync {
    /// Create an NV12 render-target texture pair with a shareable primary
    /// handle. Fails if the device cannot allocate the textures.
    fn create_shared_texture_pair(&self, width: u32, height: u32) -> Result<SharedTexturePair>;

    /// Destroy a texture previously returned by
    /// `create_shared_texture_pair`. Idempotent; the null handle is a no-op.
    fn destroy_texture(&self, texture: TextureHandle);
}
