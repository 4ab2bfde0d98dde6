//! Jitter buffer for incoming remote inputs.
//!
//! Smooths arrival-time variance into a steady per-frame delivery schedule:
//! an input becomes due `window` ticks after it arrives, and due inputs
//! release strictly in frame order. Inputs below the release point have
//! already been delivered once and are dropped as duplicates (every burst
//! redundantly re-carries recent frames, so duplicates are the common
//! case). A gap left by loss stalls release at the missing frame until a
//! retransmission fills it; prediction covers the stalled frames meanwhile.

use std::collections::BTreeMap;

use kumite_core::InputFrame;
use tracing::trace;

/// Hard bound on buffered frames ahead of the release point; anything
/// further out is garbage or an attack and is ignored.
const MAX_LOOKAHEAD: u32 = 512;

#[derive(Debug, Clone, Copy)]
struct PendingInput {
    bits: u16,
    due_tick: u64,
}

#[derive(Debug)]
pub struct JitterBuffer {
    window: u64,
    pending: BTreeMap<u32, PendingInput>,
    /// Next frame to release; everything below has been released.
    next_release: u32,
}

impl JitterBuffer {
    pub fn new(window_frames: u32) -> Self {
        Self {
            window: u64::from(window_frames),
            pending: BTreeMap::new(),
            next_release: 0,
        }
    }

    /// Change the window. Applies to inputs that arrive from now on.
    pub fn set_window(&mut self, window_frames: u32) {
        self.window = u64::from(window_frames);
    }

    /// Next frame the buffer will release; doubles as the in-order
    /// acknowledgement frontier reported back to the peer.
    pub fn next_release(&self) -> u32 {
        self.next_release
    }

    /// Buffer an arrived input. Returns `false` when it was dropped as a
    /// duplicate (at/below the release point, or already buffered) or as
    /// out-of-range garbage.
    pub fn push(&mut self, input: InputFrame, arrival_tick: u64) -> bool {
        if input.frame < self.next_release {
            return false;
        }
        if input.frame - self.next_release > MAX_LOOKAHEAD {
            trace!(frame = input.frame, "ignoring input far ahead of the release point");
            return false;
        }
        let due_tick = arrival_tick + self.window;
        // First arrival wins; re-deliveries never change the value.
        let mut inserted = false;
        self.pending.entry(input.frame).or_insert_with(|| {
            inserted = true;
            PendingInput {
                bits: input.bits,
                due_tick,
            }
        });
        inserted
    }

    /// Release the input for `frame` iff it is the next in order and due.
    pub fn pull(&mut self, frame: u32, now_tick: u64) -> Option<InputFrame> {
        if frame != self.next_release {
            return None;
        }
        let entry = self.pending.get(&frame)?;
        if entry.due_tick > now_tick {
            return None;
        }
        let entry = self.pending.remove(&frame)?;
        self.next_release = frame + 1;
        Some(InputFrame::new(frame, entry.bits))
    }

    /// Release every due input, in frame order.
    pub fn pull_due(&mut self, now_tick: u64) -> Vec<InputFrame> {
        let mut released = Vec::new();
        while let Some(input) = self.pull(self.next_release, now_tick) {
            released.push(input);
        }
        released
    }

    /// Drop everything and restart release at `next_frame` (resync rebase).
    pub fn reset(&mut self, next_frame: u32) {
        self.pending.clear();
        self.next_release = next_frame;
    }
}
