//! Input frames and local input capture.

mod shaping;
mod source;

pub use shaping::{InputShaper, ShapingConfig, SocdPolicy};
pub use source::InputSource;

use serde::{Deserialize, Serialize};

/// Button/direction bit positions inside an input bitmask.
///
/// Bit positions are part of the wire format and must stay stable.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Up = 1 << 0,
    Down = 1 << 1,
    Left = 1 << 2,
    Right = 1 << 3,
    LightPunch = 1 << 4,
    HeavyPunch = 1 << 5,
    LightKick = 1 << 6,
    HeavyKick = 1 << 7,
    Start = 1 << 8,
}

impl Button {
    pub const fn bit(self) -> u16 {
        self as u16
    }

    /// The four cardinal directions, as (direction, opposite) pairs.
    pub const OPPOSING_PAIRS: [(Button, Button); 2] =
        [(Button::Left, Button::Right), (Button::Up, Button::Down)];

    /// Attack buttons eligible for negative-edge re-assertion.
    pub const ATTACKS: [Button; 4] = [
        Button::LightPunch,
        Button::HeavyPunch,
        Button::LightKick,
        Button::HeavyKick,
    ];
}

/// One player's packed input for one frame.
///
/// Immutable once finalized for a frame: confirmed inputs are never
/// rewritten, and frame numbers are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFrame {
    pub frame: u32,
    pub bits: u16,
}

impl InputFrame {
    pub fn new(frame: u32, bits: u16) -> Self {
        Self { frame, bits }
    }

    pub fn pressed(&self, button: Button) -> bool {
        self.bits & button.bit() != 0
    }
}
