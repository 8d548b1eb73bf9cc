/*!
 * GPU Encode Pipeline
 *
 * Coordinates the texture frame pool, the dispatch thread that fans frames
 * out to registered encoders, and the per-encoder encode workers.
 */

pub mod dispatch;
pub mod encode_worker;
pub(crate) mod frame_pool;

pub use dispatch::EncodePipeline;
pub use encode_worker::EncodeWorker;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Encode target width in pixels
    pub width: u32,
    /// Encode target height in pixels
    pub height: u32,
    /// Fixed number of pooled encode textures
    pub pool_size: usize,
    /// Interval between output frames, nanoseconds
    pub frame_interval_ns: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            pool_size: 10,
            frame_interval_ns: 1_000_000_000 / 60,
        }
    }
}

impl PipelineConfig {
    /// Config for a given output rate.
    pub fn with_fps(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            frame_interval_ns: 1_000_000_000 / u64::from(fps.max(1)),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.pool_size == 0 {
            return Err(PipelineError::InvalidConfig("pool_size must be nonzero".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "invalid encode dimensions {}x{}",
                self.width, self.height
            )));
        }
        if self.frame_interval_ns == 0 {
            return Err(PipelineError::InvalidConfig(
                "frame_interval_ns must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

/// Startup failures. All are fatal to pipeline creation and leave no thread
/// running; steady-state encode failures are never surfaced here — they
/// travel to the `PacketSink` as failed outcomes.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("shared-texture encoding is not supported on this platform")]
    Unsupported,

    #[error("failed to allocate encode textures: {0}")]
    Graphics(anyhow::Error),

    #[error("failed to spawn pipeline thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}
