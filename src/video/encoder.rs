/*!
 * Encoder Registration
 *
 * The pipeline-facing view of a video encoder: the `TextureEncoder` trait
 * the encode call goes through, the per-encoder timing and pairing state
 * the dispatch loop maintains, and the registration list it snapshots.
 */

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::graphics::SharedTextureId;

/// Encoded bitstream packet produced by one encode call.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// Encoded frame data
    pub data: Bytes,
    /// Presentation timestamp (encoder time-base units)
    pub pts: i64,
    /// Decode timestamp (encoder time-base units)
    pub dts: i64,
    /// Whether this is a keyframe (I-frame)
    pub keyframe: bool,
}

/// Result of one texture encode attempt.
///
/// A failed attempt is data, not a fault: it is forwarded downstream like
/// any other outcome and the pipeline keeps looping.
#[derive(Debug, Clone, Default)]
pub struct EncodeOutcome {
    /// Whether the encoder accepted the frame.
    pub success: bool,
    /// Output packet, if the encoder emitted one on this call.
    pub packet: Option<EncodedPacket>,
}

impl EncodeOutcome {
    /// Whether the encoder produced output on this call. Encoders with
    /// internal lookahead can succeed without emitting a packet yet.
    pub fn received_output(&self) -> bool {
        self.packet.is_some()
    }
}

/// Hardware or software encoder that consumes shared GPU textures.
pub trait TextureEncoder: Send {
    /// Encode the texture identified by `texture` at presentation time
    /// `pts` (units of this encoder's time base).
    fn encode_texture(&mut self, texture: SharedTextureId, pts: i64) -> EncodeOutcome;
}

/// Downstream consumer of encode results.
///
/// `deliver` is called exactly once per fan-out attempt that actually
/// invoked `encode_texture` — including failed attempts.
pub trait PacketSink: Send + Sync {
    fn deliver(&self, encoder: &Arc<EncoderSession>, outcome: EncodeOutcome);
}

/// One encoder registered with a pipeline, plus the timing state the
/// dispatch loop maintains for it.
///
/// Sessions are shared as `Arc`s: the dispatch loop clones the Arc for the
/// duration of one fan-out pass, so deregistration elsewhere never frees a
/// session an encode call is still using.
pub struct EncoderSession {
    name: String,
    timebase_num: u32,
    timebase_den: u32,
    encoder: Mutex<Box<dyn TextureEncoder>>,
    /// Accumulated presentation timestamp, advanced once per fan-out attempt.
    cur_pts: AtomicI64,
    /// Timestamp of the first frame offered to this encoder. Doubles as the
    /// pairing marker its partner checks before starting.
    first_timestamp: Mutex<Option<u64>>,
    first_received: AtomicBool,
    paired: Mutex<Option<Weak<EncoderSession>>>,
}

impl EncoderSession {
    pub fn new(
        name: impl Into<String>,
        timebase_num: u32,
        timebase_den: u32,
        encoder: Box<dyn TextureEncoder>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            timebase_num,
            timebase_den,
            encoder: Mutex::new(encoder),
            cur_pts: AtomicI64::new(0),
            first_timestamp: Mutex::new(None),
            first_received: AtomicBool::new(false),
            paired: Mutex::new(None),
        })
    }

    /// Link two encoders whose outputs must stay timestamp-synchronized.
    /// The references are weak, so either side can be deregistered and
    /// dropped without the other keeping it alive.
    pub fn pair(a: &Arc<Self>, b: &Arc<Self>) {
        *a.paired.lock() = Some(Arc::downgrade(b));
        *b.paired.lock() = Some(Arc::downgrade(a));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timebase(&self) -> (u32, u32) {
        (self.timebase_num, self.timebase_den)
    }

    /// Accumulated presentation timestamp for the next encode call.
    pub fn current_pts(&self) -> i64 {
        self.cur_pts.load(Ordering::Relaxed)
    }

    /// Whether this encoder has produced output at least once.
    pub fn has_received_output(&self) -> bool {
        self.first_received.load(Ordering::SeqCst)
    }

    /// Timestamp of the first frame offered to this encoder, if any.
    pub fn first_timestamp(&self) -> Option<u64> {
        *self.first_timestamp.lock()
    }

    /// Pairing gate: an encoder that has not yet produced output defers to
    /// its partner until the partner has produced output at a timestamp no
    /// later than the frame being offered.
    pub(crate) fn should_skip_for_pairing(&self, timestamp_ns: u64) -> bool {
        if self.has_received_output() {
            return false;
        }
        let pair = match self.paired.lock().as_ref().and_then(Weak::upgrade) {
            Some(pair) => pair,
            None => return false,
        };
        if !pair.has_received_output() {
            return true;
        }
        match pair.first_timestamp() {
            Some(first) => first > timestamp_ns,
            None => true,
        }
    }

    pub(crate) fn latch_first_timestamp(&self, timestamp_ns: u64) {
        let mut first = self.first_timestamp.lock();
        if first.is_none() {
            *first = Some(timestamp_ns);
        }
    }

    pub(crate) fn mark_received(&self) {
        self.first_received.store(true, Ordering::SeqCst);
    }

    /// Run one encode call at the accumulated presentation timestamp.
    pub(crate) fn encode(&self, texture: SharedTextureId) -> EncodeOutcome {
        let pts = self.current_pts();
        self.encoder.lock().encode_texture(texture, pts)
    }

    /// Advance the accumulator by one time-base step. Runs once per fan-out
    /// attempt, success or not, so per-encoder pts stays monotonic.
    pub(crate) fn advance_pts(&self) {
        self.cur_pts
            .fetch_add(i64::from(self.timebase_num), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for EncoderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderSession")
            .field("name", &self.name)
            .field("timebase", &(self.timebase_num, self.timebase_den))
            .field("cur_pts", &self.current_pts())
            .field("first_received", &self.has_received_output())
            .finish()
    }
}

/// Registration list for one pipeline. Stands in for the encoder-management
/// collaborator: the dispatch loop only ever takes snapshots, so a slow
/// encode call never blocks register/deregister.
#[derive(Default)]
pub struct EncoderSet {
    encoders: Mutex<Vec<Arc<EncoderSession>>>,
}

impl EncoderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an encoder. Fan-out visits encoders in registration order.
    pub fn register(&self, encoder: Arc<EncoderSession>) {
        self.encoders.lock().push(encoder);
    }

    /// Remove an encoder. A fan-out pass already holding a snapshot keeps
    /// its reference until the pass completes.
    pub fn deregister(&self, encoder: &Arc<EncoderSession>) {
        self.encoders.lock().retain(|e| !Arc::ptr_eq(e, encoder));
    }

    /// Momentary copy of the registration list, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<EncoderSession>> {
        self.encoders.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.encoders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
