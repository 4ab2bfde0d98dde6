//! Confirmed-input storage and hold-last-input prediction.

use std::collections::BTreeMap;

use tracing::warn;

use crate::input::InputFrame;
use crate::sim::PlayerSide;

/// Result of recording a confirmed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// First confirmation for this frame.
    New,
    /// Re-confirmation with the same value; a no-op.
    Duplicate,
    /// Re-confirmation with a different value. Confirmed inputs are
    /// immutable, so the new value is rejected and the stored one kept.
    Changed { previous: u16 },
}

/// Whether an input value was confirmed or predicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Confirmed,
    Predicted,
}

/// Per-player confirmed inputs plus the prediction used to fill gaps.
///
/// Prediction is hold-last-input: the confirmed value of the nearest
/// earlier frame. The simplest policy that is also trivially deterministic
/// and cheap to resimulate.
#[derive(Debug, Default)]
pub struct PredictionStore {
    confirmed: [BTreeMap<u32, u16>; 2],
    /// Highest frame F per side such that every frame `..=F` is confirmed.
    frontier: [Option<u32>; 2],
    /// Inputs below this frame have been pruned; late copies are ignored.
    floor: u32,
}

impl PredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed input. Idempotent for repeated identical values;
    /// a conflicting value for an already-confirmed frame is rejected.
    pub fn record_confirmed(&mut self, side: PlayerSide, input: InputFrame) -> Confirmation {
        if input.frame < self.floor {
            return Confirmation::Duplicate;
        }
        let map = &mut self.confirmed[side.index()];
        if let Some(&previous) = map.get(&input.frame) {
            if previous == input.bits {
                return Confirmation::Duplicate;
            }
            warn!(
                frame = input.frame,
                previous,
                rejected = input.bits,
                "conflicting re-confirmation for an already-confirmed frame"
            );
            return Confirmation::Changed { previous };
        }
        map.insert(input.frame, input.bits);
        self.advance_frontier(side);
        Confirmation::New
    }

    /// The input to use for `frame`: confirmed when available, otherwise the
    /// hold-last prediction (0 before any input is confirmed).
    pub fn input_for(&self, side: PlayerSide, frame: u32) -> (u16, InputKind) {
        let map = &self.confirmed[side.index()];
        if let Some(&bits) = map.get(&frame) {
            return (bits, InputKind::Confirmed);
        }
        let predicted = map
            .range(..frame)
            .next_back()
            .map(|(_, &bits)| bits)
            .unwrap_or(0);
        (predicted, InputKind::Predicted)
    }

    pub fn confirmed_bits(&self, side: PlayerSide, frame: u32) -> Option<u16> {
        self.confirmed[side.index()].get(&frame).copied()
    }

    /// Highest frame F such that every frame `..=F` is confirmed for `side`.
    pub fn confirmed_frontier(&self, side: PlayerSide) -> Option<u32> {
        self.frontier[side.index()]
    }

    /// Drop confirmed inputs below `frame`. Late arrivals below the floor
    /// are ignored by `record_confirmed` so a pruned frame can never arm a
    /// rollback the snapshots no longer cover.
    ///
    /// Frames below the floor count as final for frontier purposes: after a
    /// full-state resync rebases the timeline, the restored state already
    /// embeds every input up to the rebase frame.
    pub fn prune_before(&mut self, frame: u32) {
        if frame <= self.floor {
            return;
        }
        self.floor = frame;
        let settled = frame.checked_sub(1);
        for map in &mut self.confirmed {
            *map = map.split_off(&frame);
        }
        for side in [PlayerSide::P1, PlayerSide::P2] {
            let idx = side.index();
            if self.frontier[idx] < settled {
                self.frontier[idx] = settled;
            }
            self.advance_frontier(side);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn advance_frontier(&mut self, side: PlayerSide) {
        let map = &self.confirmed[side.index()];
        let mut next = match self.frontier[side.index()] {
            Some(f) => f + 1,
            None => self.floor,
        };
        let mut advanced = self.frontier[side.index()];
        while map.contains_key(&next) {
            advanced = Some(next);
            next += 1;
        }
        self.frontier[side.index()] = advanced;
    }
}
