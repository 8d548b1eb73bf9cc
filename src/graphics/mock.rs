//! In-memory `GpuDevice` for tests. Hands out sequential handles and keeps
//! a ledger of live textures so teardown tests can assert nothing leaks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};
use parking_lot::Mutex;

use super::{GpuDevice, SharedTextureId, SharedTexturePair, TextureHandle};

pub(crate) struct MockDevice {
    next: AtomicU64,
    live: Mutex<HashSet<u64>>,
    creations_left: Mutex<Option<usize>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            live: Mutex::new(HashSet::new()),
            creations_left: Mutex::new(None),
        }
    }

    /// Device that allows `n` successful pair creations, then fails.
    pub fn failing_after(n: usize) -> Self {
        let device = Self::new();
        *device.creations_left.lock() = Some(n);
        device
    }

    /// Number of textures created and not yet destroyed.
    pub fn live_textures(&self) -> usize {
        self.live.lock().len()
    }
}

impl GpuDevice for MockDevice {
    fn create_shared_texture_pair(&self, _width: u32, _height: u32) -> Result<SharedTexturePair> {
        if let Some(left) = self.creations_left.lock().as_mut() {
            if *left == 0 {
                bail!("mock texture allocation exhausted");
            }
            *left -= 1;
        }

        let luma = self.next.fetch_add(1, Ordering::Relaxed);
        let chroma = self.next.fetch_add(1, Ordering::Relaxed);
        let mut live = self.live.lock();
        live.insert(luma);
        live.insert(chroma);

        Ok(SharedTexturePair {
            luma: TextureHandle::from_raw(luma),
            chroma: TextureHandle::from_raw(chroma),
            shared_id: SharedTextureId(luma),
        })
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        if texture.is_null() {
            return;
        }
        self.live.lock().remove(&texture.as_raw());
    }
}
