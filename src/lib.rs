/*!
 * Axon Encode Pipeline Library
 *
 * GPU texture encode pipeline for desktop capture agents: a fixed pool of
 * shared GPU textures, a dispatch thread that fans rendered frames out to
 * every registered encoder, and per-encoder encode worker threads.
 */

pub mod graphics;
pub mod pipeline;
pub mod platform;
pub mod video;

mod sync;

// Re-export commonly used types
pub use graphics::{GpuDevice, SharedTextureId, SharedTexturePair, TextureHandle};
pub use pipeline::{EncodePipeline, EncodeWorker, PipelineConfig, PipelineError};
pub use video::{
    AcquiredFrame, EncodeOutcome, EncodedPacket, EncoderSession, EncoderSet, PacketSink,
    TextureEncoder,
};
