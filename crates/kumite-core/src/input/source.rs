//! Local input capture.

use std::time::Instant;

use super::{InputFrame, InputShaper, ShapingConfig};

/// Captures one local input sample per simulation step, assigns it a
/// monotonically increasing frame number (never reused) and shapes it.
#[derive(Debug, Default)]
pub struct InputSource {
    next_frame: u32,
    shaper: InputShaper,
}

impl InputSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture and shape a raw bitmask for the next frame.
    pub fn capture(&mut self, raw: u16, now: Instant, config: &ShapingConfig) -> InputFrame {
        let bits = self.shaper.shape(raw, now, config);
        let frame = self.next_frame;
        self.next_frame += 1;
        InputFrame { frame, bits }
    }

    /// The frame number the next `capture` call will assign.
    pub fn next_frame(&self) -> u32 {
        self.next_frame
    }

    /// Jump the counter forward (never backward) so the next capture lands
    /// at `frame` or later. A full-state resync may rebase the timeline
    /// ahead of the local capture counter; frame numbers are still never
    /// reused.
    pub fn advance_to(&mut self, frame: u32) {
        self.next_frame = self.next_frame.max(frame);
    }

    /// Clear shaping state without rewinding the frame counter. Frame
    /// numbers stay monotonic across reconnects.
    pub fn clear_held(&mut self) {
        self.shaper.reset();
    }
}
