/*!
 * Texture Frame Pool
 *
 * Fixed set of GPU encode buffers partitioned into available,
 * pending-dispatch, and active collections. Every state transition runs
 * under one mutex; encode calls never do.
 */

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::graphics::SharedTextureId;
use crate::video::TexFrame;

/// Snapshot of how the fixed frame set is currently partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolCounts {
    pub available: usize,
    pub pending: usize,
    pub active: usize,
    pub leased: usize,
}

/// Result of draining the dispatch head: the frame to fan out (carrying its
/// original timestamp) and whether a repeat copy was re-queued at the front.
pub(crate) struct DispatchFrame {
    pub frame: TexFrame,
    pub repeat_queued: bool,
}

pub(crate) struct FramePool {
    state: Mutex<PoolState>,
}

struct PoolState {
    available: VecDeque<TexFrame>,
    pending: VecDeque<TexFrame>,
    active: Vec<TexFrame>,
    /// Frames checked out of all collections: producer render leases plus
    /// the frame the dispatch loop is currently fanning out.
    leased: usize,
    capacity: usize,
}

impl PoolState {
    fn check(&self) {
        debug_assert_eq!(
            self.available.len() + self.pending.len() + self.active.len() + self.leased,
            self.capacity,
            "pool frame count drifted from capacity"
        );

        #[cfg(debug_assertions)]
        {
            let mut ids: Vec<u64> = self
                .available
                .iter()
                .chain(self.pending.iter())
                .chain(self.active.iter())
                .map(|f| f.shared_id.0)
                .collect();
            ids.sort_unstable();
            let total = ids.len();
            ids.dedup();
            debug_assert_eq!(total, ids.len(), "frame handle present in two collections");
        }
    }
}

impl FramePool {
    /// Build a pool over a fixed frame set. The pool never grows; frames
    /// recycle between collections until teardown drains them.
    pub fn new(frames: Vec<TexFrame>) -> Self {
        let capacity = frames.len();
        Self {
            state: Mutex::new(PoolState {
                available: frames.into_iter().collect(),
                pending: VecDeque::with_capacity(capacity),
                active: Vec::with_capacity(capacity),
                leased: 0,
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Take the head of the available queue for rendering. `None` means the
    /// producer must skip this cycle.
    pub fn acquire_available(&self) -> Option<TexFrame> {
        let mut state = self.state.lock();
        let frame = state.available.pop_front()?;
        state.leased += 1;
        state.check();
        Some(frame)
    }

    /// Hand back a lease that was never rendered into.
    pub fn return_unused(&self, frame: TexFrame) {
        let mut state = self.state.lock();
        state.leased -= 1;
        state.available.push_back(frame);
        state.check();
    }

    /// Move a rendered frame into the pending-dispatch queue. The caller
    /// posts the dispatch wake signal once per queued frame.
    pub fn queue_frame(&self, frame: TexFrame) {
        let mut state = self.state.lock();
        state.leased -= 1;
        state.pending.push_back(frame);
        state.check();
    }

    /// Pop the dispatch head and apply repeat accounting: the repeat count
    /// is decremented, and while it stays nonzero a copy with the timestamp
    /// advanced by one frame interval re-enters at the *front* of pending so
    /// the same buffer is redelivered next cycle without re-rendering.
    pub fn pop_for_dispatch(&self, frame_interval_ns: u64) -> Option<DispatchFrame> {
        let mut state = self.state.lock();
        let mut frame = state.pending.pop_front()?;

        frame.repeats_left = frame.repeats_left.saturating_sub(1);
        let repeat_queued = frame.repeats_left > 0;
        if repeat_queued {
            let mut copy = frame;
            copy.timestamp_ns = frame.timestamp_ns + frame_interval_ns;
            copy.refs = 0;
            state.pending.push_front(copy);
        } else {
            state.leased += 1;
        }

        state.check();
        Some(DispatchFrame {
            frame,
            repeat_queued,
        })
    }

    /// Return a fanned-out frame to the pool: to the available queue when no
    /// encoder holds it, otherwise to the active list carrying the refs
    /// taken during its most recent fan-out.
    pub fn recycle(&self, frame: TexFrame) {
        let mut state = self.state.lock();
        state.leased -= 1;
        if frame.refs == 0 {
            state.available.push_back(frame);
        } else {
            state.active.push(frame);
        }
        state.check();
    }

    /// Release one encoder reference on an active frame, by shareable id.
    /// At zero refs the frame moves to the available queue — never back to
    /// pending. An id with no active match is a tolerated no-op (late or
    /// duplicate releases race handle reuse legitimately); returns whether a
    /// frame was returned to the available queue.
    pub fn release(&self, id: SharedTextureId) -> bool {
        let mut state = self.state.lock();
        if let Some(idx) = state.active.iter().position(|f| f.shared_id == id) {
            state.active[idx].refs -= 1;
            if state.active[idx].refs == 0 {
                let frame = state.active.remove(idx);
                state.available.push_back(frame);
                state.check();
                return true;
            }
        }
        state.check();
        false
    }

    /// Empty every collection for teardown. Outstanding leases are the
    /// caller's to return first; whatever is still leased is not included.
    pub fn drain_all(&self) -> Vec<TexFrame> {
        let mut state = self.state.lock();
        let mut frames: Vec<TexFrame> = state.available.drain(..).collect();
        frames.extend(state.pending.drain(..));
        frames.extend(state.active.drain(..));
        // Only still-leased frames remain accounted for after a drain.
        state.capacity = state.leased;
        state.check();
        frames
    }

    pub fn counts(&self) -> PoolCounts {
        let state = self.state.lock();
        PoolCounts {
            available: state.available.len(),
            pending: state.pending.len(),
            active: state.active.len(),
            leased: state.leased,
        }
    }
}
