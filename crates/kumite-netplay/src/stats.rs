//! Connection-quality telemetry.
//!
//! The match loop owns a [`StatsTracker`] and feeds it ping/pong samples
//! and header sequence numbers; UI overlays poll the atomics-backed
//! [`SharedStats`] handle. Degradation is telemetry, never an error.

use std::sync::{
    Arc,
    atomic::{AtomicI64, AtomicU32, Ordering},
};

/// EWMA weight for RTT samples (RFC 6298 style).
const RTT_ALPHA: f32 = 0.125;
/// EWMA weight for the absolute deviation (jitter).
const JITTER_ALPHA: f32 = 0.25;
/// Sequence span per loss-accounting window.
const LOSS_WINDOW: u32 = 600;

/// Read-only snapshot handed to pollers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    pub rtt_ms: f32,
    pub jitter_ms: f32,
    pub loss_percent: f32,
}

/// Shared, lock-free view of the live statistics.
#[derive(Debug, Default)]
pub struct SharedStats {
    rtt_us: AtomicU32,
    jitter_us: AtomicU32,
    loss_permille: AtomicU32,
    last_validated_frame: AtomicU32,
    last_mismatch_frame: AtomicI64,
}

impl SharedStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            last_mismatch_frame: AtomicI64::new(-1),
            ..Self::default()
        })
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            rtt_ms: self.rtt_us.load(Ordering::Relaxed) as f32 / 1000.0,
            jitter_ms: self.jitter_us.load(Ordering::Relaxed) as f32 / 1000.0,
            loss_percent: self.loss_permille.load(Ordering::Relaxed) as f32 / 10.0,
        }
    }

    pub fn last_validated_frame(&self) -> u32 {
        self.last_validated_frame.load(Ordering::Relaxed)
    }

    pub fn last_mismatch_frame(&self) -> i64 {
        self.last_mismatch_frame.load(Ordering::Relaxed)
    }
}

/// Owned by the match loop; never touched by any other thread.
#[derive(Debug)]
pub struct StatsTracker {
    shared: Arc<SharedStats>,
    rtt_ms: Option<f32>,
    jitter_ms: f32,
    /// Loss accounting over a sliding sequence window: highest seq seen,
    /// plus a 64-bit presence mask of the sequences just below it (the
    /// same shape as the header's ack_bits), so duplicates never inflate
    /// the received count.
    highest_seq: Option<u32>,
    seq_mask: u64,
    window_expected: u32,
    window_received: u32,
}

impl StatsTracker {
    pub fn new(shared: Arc<SharedStats>) -> Self {
        Self {
            shared,
            rtt_ms: None,
            jitter_ms: 0.0,
            highest_seq: None,
            seq_mask: 0,
            window_expected: 0,
            window_received: 0,
        }
    }

    pub fn shared(&self) -> Arc<SharedStats> {
        Arc::clone(&self.shared)
    }

    /// Feed one RTT sample from a pong.
    pub fn on_pong(&mut self, sample_ms: f32) {
        let rtt = match self.rtt_ms {
            Some(rtt) => rtt + RTT_ALPHA * (sample_ms - rtt),
            None => sample_ms,
        };
        self.jitter_ms += JITTER_ALPHA * ((sample_ms - rtt).abs() - self.jitter_ms);
        self.rtt_ms = Some(rtt);
        self.shared
            .rtt_us
            .store((rtt * 1000.0) as u32, Ordering::Relaxed);
        self.shared
            .jitter_us
            .store((self.jitter_ms * 1000.0) as u32, Ordering::Relaxed);
    }

    /// Feed the sequence number of every received packet.
    pub fn on_packet(&mut self, seq: u32) {
        let Some(highest) = self.highest_seq else {
            self.highest_seq = Some(seq);
            self.seq_mask = 1;
            self.window_expected = 1;
            self.window_received = 1;
            return;
        };

        if seq > highest {
            let advance = seq - highest;
            self.seq_mask = if advance >= 64 {
                0
            } else {
                self.seq_mask << advance
            };
            self.seq_mask |= 1;
            self.highest_seq = Some(seq);
            self.window_expected += advance;
            self.window_received += 1;
        } else {
            let behind = highest - seq;
            if behind >= 64 {
                return; // Too old to account for.
            }
            let bit = 1u64 << behind;
            if self.seq_mask & bit != 0 {
                return; // Duplicate.
            }
            self.seq_mask |= bit;
            self.window_received += 1;
        }

        if self.window_expected >= LOSS_WINDOW {
            let lost = self.window_expected.saturating_sub(self.window_received);
            let permille = (u64::from(lost) * 1000 / u64::from(self.window_expected)) as u32;
            self.shared.loss_permille.store(permille, Ordering::Relaxed);
            self.window_expected = 0;
            self.window_received = 0;
        }
    }

    /// Mirror the determinism validator's progress into the shared view.
    pub fn set_validation(&self, last_validated: u32, last_mismatch: i64) {
        self.shared
            .last_validated_frame
            .store(last_validated, Ordering::Relaxed);
        self.shared
            .last_mismatch_frame
            .store(last_mismatch, Ordering::Relaxed);
    }
}
