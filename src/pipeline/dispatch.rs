/*!
 * Dispatch Loop
 *
 * One dedicated thread per pipeline drains the pending-dispatch queue and
 * fans each frame out to every registered encoder, then recycles the frame
 * according to its repeat count and outstanding references. All pool
 * mutation happens under the pool lock; the encode calls themselves do not.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, trace, warn};

use super::frame_pool::FramePool;
use super::{PipelineConfig, PipelineError};
use crate::graphics::{GpuDevice, SharedTextureId};
use crate::sync::Semaphore;
use crate::video::{AcquiredFrame, EncoderSet, PacketSink, TexFrame};

struct PipelineShared {
    device: Arc<dyn GpuDevice>,
    encoders: Arc<EncoderSet>,
    sink: Arc<dyn PacketSink>,
    pool: FramePool,
    signal: Semaphore,
    stop: AtomicBool,
    frame_interval_ns: u64,
}

/// One GPU encode pipeline: the fixed texture pool plus the dispatch thread
/// feeding every encoder registered in its `EncoderSet`.
///
/// Owned by the caller; there is no process-wide pipeline state. Dropping
/// the pipeline runs the same teardown as `end`.
pub struct EncodePipeline {
    shared: Arc<PipelineShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl EncodePipeline {
    /// Allocate the texture pool and start the dispatch thread.
    ///
    /// Any allocation failure tears down whatever was already created and
    /// returns with no thread running.
    pub fn begin(
        device: Arc<dyn GpuDevice>,
        encoders: Arc<EncoderSet>,
        sink: Arc<dyn PacketSink>,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        info!(
            "Starting GPU encode pipeline: {}x{}, {} pooled textures",
            config.width, config.height, config.pool_size
        );

        let mut frames = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            match device.create_shared_texture_pair(config.width, config.height) {
                Ok(pair) => frames.push(TexFrame::new(pair)),
                Err(e) => {
                    for frame in frames {
                        device.destroy_texture(frame.luma);
                        device.destroy_texture(frame.chroma);
                    }
                    return Err(PipelineError::Graphics(e));
                }
            }
        }

        let shared = Arc::new(PipelineShared {
            device,
            encoders,
            sink,
            pool: FramePool::new(frames),
            signal: Semaphore::new(),
            stop: AtomicBool::new(false),
            frame_interval_ns: config.frame_interval_ns,
        });

        let spawned = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("axon gpu dispatch".to_string())
                .spawn(move || dispatch_loop(shared))
        };
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                for frame in shared.pool.drain_all() {
                    shared.device.destroy_texture(frame.luma);
                    shared.device.destroy_texture(frame.chroma);
                }
                return Err(PipelineError::Thread(e));
            }
        };

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Take an idle frame for rendering. `None` means every pooled frame is
    /// queued, active, or already leased — skip producing this cycle.
    pub fn acquire_frame(&self) -> Option<AcquiredFrame> {
        self.shared
            .pool
            .acquire_available()
            .map(|inner| AcquiredFrame { inner })
    }

    /// Queue a rendered frame for dispatch.
    ///
    /// `repeats` is the number of dispatch cycles the frame should be
    /// delivered for (at least one); values above one redeliver the same
    /// buffer when the producer cannot keep up with the output cadence.
    pub fn queue_frame(&self, frame: AcquiredFrame, timestamp_ns: u64, repeats: u32) {
        let mut inner = frame.inner;
        inner.timestamp_ns = timestamp_ns;
        inner.repeats_left = repeats.max(1);
        inner.refs = 0;
        self.shared.pool.queue_frame(inner);
        self.shared.signal.post();
    }

    /// Hand back a frame that was acquired but not rendered this cycle.
    pub fn return_unused(&self, frame: AcquiredFrame) {
        self.shared.pool.return_unused(frame.inner);
    }

    /// Release one downstream reference on an active frame, by shareable
    /// id. Thread-safe; unknown or already-released ids are ignored.
    pub fn release_frame(&self, id: SharedTextureId) {
        if self.shared.pool.release(id) {
            trace!("encode texture {:#x} returned to pool", id.0);
        }
    }

    /// Stop the dispatch thread and destroy every pooled texture.
    pub fn end(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        info!("Stopping GPU encode pipeline");
        self.shared.stop.store(true, Ordering::Release);
        self.shared.signal.post();
        let _ = thread.join();

        let counts = self.shared.pool.counts();
        if counts.leased > 0 {
            warn!(
                "{} encode frames still leased at teardown; their textures outlive the pipeline",
                counts.leased
            );
        }

        for frame in self.shared.pool.drain_all() {
            self.shared.device.destroy_texture(frame.luma);
            self.shared.device.destroy_texture(frame.chroma);
        }
        info!("GPU encode pipeline stopped");
    }
}

impl Drop for EncodePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(shared: Arc<PipelineShared>) {
    debug!("gpu dispatch thread started");

    loop {
        shared.signal.wait();
        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        let Some(dispatch) = shared.pool.pop_for_dispatch(shared.frame_interval_ns) else {
            continue;
        };
        let mut frame = dispatch.frame;
        if dispatch.repeat_queued {
            // The front-queued copy counts as newly queued work.
            shared.signal.post();
        }
        let timestamp = frame.timestamp_ns;

        for encoder in shared.encoders.snapshot() {
            if encoder.should_skip_for_pairing(timestamp) {
                trace!("encoder {} deferring to its pair", encoder.name());
                continue;
            }

            encoder.latch_first_timestamp(timestamp);
            let outcome = encoder.encode(frame.shared_id);
            let success = outcome.success;
            if outcome.received_output() {
                encoder.mark_received();
            }
            if !success {
                warn!(
                    "encoder {} failed on frame at {} ns",
                    encoder.name(),
                    timestamp
                );
            }
            shared.sink.deliver(&encoder, outcome);
            encoder.advance_pts();
            if success {
                frame.refs += 1;
            }
        }

        if !dispatch.repeat_queued {
            shared.pool.recycle(frame);
        }
    }

    debug!("gpu dispatch thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::mock::MockDevice;
    use crate::video::{EncodeOutcome, EncodedPacket, EncoderSession, TextureEncoder};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    /// Encoder that records every call and emits configurable outcomes.
    struct RecordingEncoder {
        calls: mpsc::Sender<(u64, i64)>,
        succeed: bool,
        /// Encode calls to absorb before the first packet is emitted.
        lookahead: u32,
        seen: u32,
    }

    impl RecordingEncoder {
        fn new(calls: mpsc::Sender<(u64, i64)>) -> Self {
            Self {
                calls,
                succeed: true,
                lookahead: 0,
                seen: 0,
            }
        }
    }

    impl TextureEncoder for RecordingEncoder {
        fn encode_texture(&mut self, texture: SharedTextureId, pts: i64) -> EncodeOutcome {
            let _ = self.calls.send((texture.0, pts));
            self.seen += 1;
            let emit = self.succeed && self.seen > self.lookahead;
            EncodeOutcome {
                success: self.succeed,
                packet: emit.then(|| EncodedPacket {
                    data: Bytes::from_static(b"pkt"),
                    pts,
                    dts: pts,
                    keyframe: true,
                }),
            }
        }
    }

    struct ChannelSink {
        tx: Mutex<mpsc::Sender<(String, EncodeOutcome)>>,
    }

    impl ChannelSink {
        fn new() -> (Arc<Self>, mpsc::Receiver<(String, EncodeOutcome)>) {
            let (tx, rx) = mpsc::channel();
            (Arc::new(Self { tx: Mutex::new(tx) }), rx)
        }
    }

    impl crate::video::PacketSink for ChannelSink {
        fn deliver(&self, encoder: &Arc<EncoderSession>, outcome: EncodeOutcome) {
            let _ = self.tx.lock().send((encoder.name().to_string(), outcome));
        }
    }

    fn config(pool_size: usize) -> PipelineConfig {
        PipelineConfig {
            width: 64,
            height: 64,
            pool_size,
            frame_interval_ns: 10,
        }
    }

    /// Opt-in test logging: RUST_LOG=trace cargo test -- --nocapture
    fn logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    /// Poll until `cond` holds; panics after two seconds.
    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition never held");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_frames_dispatch_in_fifo_order() {
        logging();
        let device = Arc::new(MockDevice::new());
        let encoders = Arc::new(EncoderSet::new());
        let (sink, deliveries) = ChannelSink::new();
        let (calls_tx, calls) = mpsc::channel();

        let enc = EncoderSession::new("video", 100, 6000, Box::new(RecordingEncoder::new(calls_tx)));
        encoders.register(enc.clone());

        let pipeline =
            EncodePipeline::begin(device.clone(), encoders, sink, &config(3)).unwrap();

        for ts in [0u64, 1, 2] {
            let frame = pipeline.acquire_frame().unwrap();
            pipeline.queue_frame(frame, ts, 1);
        }

        // Pool hands out frames in order, so the shared ids recorded by the
        // encoder prove dispatch order; the pts prove the accumulator.
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(calls.recv_timeout(Duration::from_secs(2)).unwrap());
        }
        assert_eq!(seen[0].1, 0);
        assert_eq!(seen[1].1, 100);
        assert_eq!(seen[2].1, 200);
        assert!(seen[0].0 < seen[1].0 && seen[1].0 < seen[2].0);

        for _ in 0..3 {
            let (name, outcome) = deliveries.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(name, "video");
            assert!(outcome.success);
        }

        // Three fan-out attempts advance the accumulator by 3 time-base
        // steps. The advance lands just after delivery, so poll.
        wait_until(|| enc.current_pts() == 300);
        pipeline.end();
    }

    #[test]
    fn test_successful_encode_holds_frame_until_release() {
        let device = Arc::new(MockDevice::new());
        let encoders = Arc::new(EncoderSet::new());
        let (sink, deliveries) = ChannelSink::new();
        let (calls_tx, _calls) = mpsc::channel();

        let enc = EncoderSession::new("video", 100, 6000, Box::new(RecordingEncoder::new(calls_tx)));
        encoders.register(enc);

        let pipeline =
            EncodePipeline::begin(device.clone(), encoders, sink, &config(2)).unwrap();

        let frame = pipeline.acquire_frame().unwrap();
        let id = frame.shared_id();
        pipeline.queue_frame(frame, 0, 1);

        deliveries.recv_timeout(Duration::from_secs(2)).unwrap();
        wait_until(|| pipeline.shared.pool.counts().active == 1);

        // First release returns the frame to the available queue; the
        // duplicate is a no-op and must not double-recycle.
        pipeline.release_frame(id);
        assert_eq!(pipeline.shared.pool.counts().available, 2);
        pipeline.release_frame(id);
        assert_eq!(pipeline.shared.pool.counts().available, 2);
        assert_eq!(pipeline.shared.pool.counts().active, 0);

        pipeline.end();
    }

    #[test]
    fn test_failed_encode_is_delivered_and_frame_recycled() {
        let device = Arc::new(MockDevice::new());
        let encoders = Arc::new(EncoderSet::new());
        let (sink, deliveries) = ChannelSink::new();
        let (calls_tx, _calls) = mpsc::channel();

        let mut failing = RecordingEncoder::new(calls_tx);
        failing.succeed = false;
        let enc = EncoderSession::new("video", 100, 6000, Box::new(failing));
        encoders.register(enc.clone());

        let pipeline =
            EncodePipeline::begin(device.clone(), encoders, sink, &config(1)).unwrap();

        let frame = pipeline.acquire_frame().unwrap();
        pipeline.queue_frame(frame, 0, 1);

        let (_, outcome) = deliveries.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!outcome.success);

        // No reference was taken, so the frame goes straight back to
        // available and the pts still advances.
        wait_until(|| pipeline.shared.pool.counts().available == 1);
        wait_until(|| enc.current_pts() == 100);

        pipeline.end();
    }

    #[test]
    fn test_repeat_redelivers_then_recycles() {
        let device = Arc::new(MockDevice::new());
        let encoders = Arc::new(EncoderSet::new());
        let (sink, deliveries) = ChannelSink::new();
        let (calls_tx, calls) = mpsc::channel();

        let mut enc = RecordingEncoder::new(calls_tx);
        enc.succeed = false;
        encoders.register(EncoderSession::new("video", 100, 6000, Box::new(enc)));

        let pipeline =
            EncodePipeline::begin(device.clone(), encoders, sink, &config(2)).unwrap();

        let frame = pipeline.acquire_frame().unwrap();
        let id = frame.shared_id();
        pipeline.queue_frame(frame, 100, 3);

        // Same buffer three cycles in a row; only then does it recycle.
        for _ in 0..3 {
            let (texture, _) = calls.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(texture, id.0);
            deliveries.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        assert!(calls.recv_timeout(Duration::from_millis(50)).is_err());
        wait_until(|| pipeline.shared.pool.counts().available == 2);

        pipeline.end();
    }

    #[test]
    fn test_paired_encoder_skips_until_partner_output() {
        let device = Arc::new(MockDevice::new());
        let encoders = Arc::new(EncoderSet::new());
        let (sink, deliveries) = ChannelSink::new();
        let (a_tx, _a_calls) = mpsc::channel();
        let (b_tx, b_calls) = mpsc::channel();

        // A needs two encode calls before its first packet appears; B would
        // produce immediately but must defer until A has output.
        let mut slow = RecordingEncoder::new(a_tx);
        slow.lookahead = 2;
        let a = EncoderSession::new("primary", 100, 6000, Box::new(slow));
        let b = EncoderSession::new("secondary", 100, 6000, Box::new(RecordingEncoder::new(b_tx)));
        EncoderSession::pair(&a, &b);
        encoders.register(a.clone());
        encoders.register(b.clone());

        let pipeline =
            EncodePipeline::begin(device.clone(), encoders, sink, &config(4)).unwrap();

        for ts in [0u64, 10, 20, 30] {
            let frame = pipeline.acquire_frame().unwrap();
            pipeline.queue_frame(frame, ts, 1);
        }

        let mut delivered = Vec::new();
        // A attempts all four frames; B only joins once A has produced.
        for _ in 0..6 {
            let (name, outcome) = deliveries.recv_timeout(Duration::from_secs(2)).unwrap();
            delivered.push((name, outcome.received_output()));
        }

        let first_b = delivered.iter().position(|(n, _)| n == "secondary").unwrap();
        let first_a_output = delivered
            .iter()
            .position(|(n, out)| n == "primary" && *out)
            .unwrap();
        assert!(
            first_a_output < first_b,
            "secondary delivered before primary produced output: {delivered:?}"
        );

        // B skipped the first two frames entirely and started no earlier
        // than A's first timestamp.
        let (_, first_b_pts) = b_calls.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first_b_pts, 0);
        wait_until(|| b.current_pts() == 200);
        assert!(b.first_timestamp().unwrap() >= a.first_timestamp().unwrap());

        pipeline.end();
    }

    #[test]
    fn test_begin_fails_cleanly_on_allocation_failure() {
        let device = Arc::new(MockDevice::failing_after(2));
        let encoders = Arc::new(EncoderSet::new());
        let (sink, _deliveries) = ChannelSink::new();

        let result = EncodePipeline::begin(device.clone(), encoders, sink, &config(3));
        assert!(matches!(result, Err(PipelineError::Graphics(_))));
        // Nothing allocated survives a failed begin.
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn test_end_destroys_every_pooled_texture() {
        let device = Arc::new(MockDevice::new());
        let encoders = Arc::new(EncoderSet::new());
        let (sink, deliveries) = ChannelSink::new();
        let (calls_tx, _calls) = mpsc::channel();
        encoders.register(EncoderSession::new(
            "video",
            100,
            6000,
            Box::new(RecordingEncoder::new(calls_tx)),
        ));

        let pipeline =
            EncodePipeline::begin(device.clone(), encoders, sink, &config(3)).unwrap();
        assert_eq!(device.live_textures(), 6);

        // Leave one frame active (reference held) so teardown has to reach
        // past the available queue.
        let frame = pipeline.acquire_frame().unwrap();
        pipeline.queue_frame(frame, 0, 1);
        deliveries.recv_timeout(Duration::from_secs(2)).unwrap();
        wait_until(|| pipeline.shared.pool.counts().active == 1);

        pipeline.end();
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn test_stop_while_blocked_ignores_later_frames() {
        let device = Arc::new(MockDevice::new());
        let encoders = Arc::new(EncoderSet::new());
        let (sink, deliveries) = ChannelSink::new();
        let (calls_tx, _calls) = mpsc::channel();
        encoders.register(EncoderSession::new(
            "video",
            100,
            6000,
            Box::new(RecordingEncoder::new(calls_tx)),
        ));

        let pipeline = EncodePipeline::begin(device, encoders, sink, &config(2)).unwrap();

        // The dispatch thread is parked on its wait with nothing queued.
        // Stopping must wake it straight into the stop check and join
        // promptly, with nothing delivered.
        pipeline.end();
        assert!(deliveries.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_stop_mid_iteration_completes_current_frame() {
        let device = Arc::new(MockDevice::new());
        let encoders = Arc::new(EncoderSet::new());
        let (sink, deliveries) = ChannelSink::new();

        // Encoder that parks inside the encode call until the test says go.
        struct GatedEncoder {
            started: mpsc::Sender<()>,
            gate: mpsc::Receiver<()>,
        }
        impl TextureEncoder for GatedEncoder {
            fn encode_texture(&mut self, _texture: SharedTextureId, pts: i64) -> EncodeOutcome {
                let _ = self.started.send(());
                let _ = self.gate.recv_timeout(Duration::from_secs(2));
                EncodeOutcome {
                    success: true,
                    packet: Some(EncodedPacket {
                        data: Bytes::from_static(b"pkt"),
                        pts,
                        dts: pts,
                        keyframe: true,
                    }),
                }
            }
        }

        let (started_tx, started) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        encoders.register(EncoderSession::new(
            "video",
            100,
            6000,
            Box::new(GatedEncoder {
                started: started_tx,
                gate: gate_rx,
            }),
        ));

        let pipeline = EncodePipeline::begin(device, encoders, sink, &config(1)).unwrap();
        let frame = pipeline.acquire_frame().unwrap();
        pipeline.queue_frame(frame, 0, 1);

        started.recv_timeout(Duration::from_secs(2)).unwrap();

        // Stop races the in-flight encode: teardown must wait for the
        // iteration, and the packet still reaches the sink.
        let stopper = thread::spawn(move || pipeline.end());
        gate_tx.send(()).unwrap();
        stopper.join().unwrap();

        let (_, outcome) = deliveries.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(outcome.success);
    }

    #[test]
    fn test_acquire_exhausts_at_pool_capacity() {
        let device = Arc::new(MockDevice::new());
        let encoders = Arc::new(EncoderSet::new());
        let (sink, _deliveries) = ChannelSink::new();

        let pipeline = EncodePipeline::begin(device, encoders, sink, &config(2)).unwrap();
        let a = pipeline.acquire_frame().unwrap();
        let _b = pipeline.acquire_frame().unwrap();
        assert!(pipeline.acquire_frame().is_none());

        pipeline.return_unused(a);
        assert!(pipeline.acquire_frame().is_some());
    }
}
