/*!
 * Encode Frame Representation
 *
 * Pooled GPU texture frames and the producer-side lease handed out while a
 * frame is being rendered.
 */

use crate::graphics::{SharedTextureId, SharedTexturePair, TextureHandle};

/// One GPU-resident encode buffer tracked by the frame pool.
///
/// A frame is plain data; the textures it names live for the whole pipeline
/// and are destroyed only at teardown. At any instant a frame sits in
/// exactly one pool collection (available, pending-dispatch, active) or is
/// leased out to the producer / the dispatch fan-out.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TexFrame {
    /// Primary (luma plane) texture.
    pub luma: TextureHandle,
    /// Secondary (chroma plane) texture.
    pub chroma: TextureHandle,
    /// Externally shareable id of the primary texture.
    pub shared_id: SharedTextureId,
    /// Presentation timestamp, nanoseconds.
    pub timestamp_ns: u64,
    /// Dispatch cycles this frame is still owed, including the current one.
    pub repeats_left: u32,
    /// Encoders currently holding the frame. Nonzero only while active.
    pub refs: u32,
}

impl TexFrame {
    pub fn new(pair: SharedTexturePair) -> Self {
        Self {
            luma: pair.luma,
            chroma: pair.chroma,
            shared_id: pair.shared_id,
            timestamp_ns: 0,
            repeats_left: 0,
            refs: 0,
        }
    }
}

/// A pool frame checked out to the producer for rendering.
///
/// The producer draws into the two plane textures, then hands the lease
/// back through `EncodePipeline::queue_frame` (or `return_unused` if it
/// rendered nothing this cycle).
#[derive(Debug)]
pub struct AcquiredFrame {
    pub(crate) inner: TexFrame,
}

impl AcquiredFrame {
    /// Primary (luma plane) render target.
    pub fn luma(&self) -> TextureHandle {
        self.inner.luma
    }

    /// Secondary (chroma plane) render target.
    pub fn chroma(&self) -> TextureHandle {
        self.inner.chroma
    }

    /// Shareable id other subsystems use to reference this frame.
    pub fn shared_id(&self) -> SharedTextureId {
        self.inner.shared_id
    }
}
