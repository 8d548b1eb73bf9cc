/*!
 * Video Module
 *
 * Frame and encoder types for the GPU texture encode pipeline.
 */

pub mod encoder;
pub mod frame;

pub use encoder::{
    EncodeOutcome, EncodedPacket, EncoderSession, EncoderSet, PacketSink, TextureEncoder,
};
pub use frame::AcquiredFrame;

pub(crate) use frame::TexFrame;
