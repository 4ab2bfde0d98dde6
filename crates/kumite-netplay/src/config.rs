//! Hot-swappable tuning knobs.
//!
//! A single shared handle holds the live configuration; the match loop
//! re-reads it at the top of every tick, so changes take effect on the
//! next tick without any cross-thread signaling.

use std::sync::Arc;

use kumite_core::{ShapingConfig, SocdPolicy};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Largest accepted jitter window, in frames.
pub const MAX_JITTER_WINDOW: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Added input delay absorbing network jitter, in frames (0–4). The
    /// one network tunable exposed to configuration.
    pub jitter_window_frames: u32,
    pub socd: SocdPolicy,
    pub negative_edge_ms: u32,
    pub motion_leniency_frames: u8,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            jitter_window_frames: 1,
            socd: SocdPolicy::Neutral,
            negative_edge_ms: 0,
            motion_leniency_frames: 3,
        }
    }
}

impl TuningConfig {
    pub fn shaping(&self) -> ShapingConfig {
        ShapingConfig {
            socd: self.socd,
            negative_edge_ms: self.negative_edge_ms,
            motion_leniency_frames: self.motion_leniency_frames,
        }
    }
}

/// Cloneable handle to the live tuning configuration.
#[derive(Debug, Clone, Default)]
pub struct SharedTuning(Arc<Mutex<TuningConfig>>);

impl SharedTuning {
    pub fn new(config: TuningConfig) -> Self {
        Self(Arc::new(Mutex::new(config)))
    }

    pub fn get(&self) -> TuningConfig {
        *self.0.lock()
    }

    pub fn set(&self, config: TuningConfig) {
        *self.0.lock() = config;
    }
}
