//! Rollback coordination: divergence detection and resimulation.
//!
//! The coordinator owns the simulation, the snapshot ring and the
//! prediction store exclusively; nothing else mutates them. Resimulation is
//! entered and exited within a single [`advance`] call and touches nothing
//! but simulation state, snapshots and the coordinator's own bookkeeping,
//! so no externally visible event can fire twice for one frame.
//!
//! [`advance`]: RollbackCoordinator::advance

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, trace};

use crate::input::InputFrame;
use crate::predict::{Confirmation, InputKind, PredictionStore};
use crate::sim::{FrameInputs, FrameOutcome, PlayerSide, SimError, Simulation, state_checksum};
use crate::snapshot::{SnapshotError, SnapshotStore, StateSnapshot};

/// How often confirmed inputs and per-frame bookkeeping are pruned behind
/// the snapshot window, in frames.
const PRUNE_INTERVAL: u32 = 30;

#[derive(Debug, Error)]
pub enum RollbackError {
    /// The divergence frame is outside the snapshot window; the session
    /// layer must perform a full-state resynchronization. Not fatal.
    #[error("rollback depth exceeded at frame {frame}; full-state resync required")]
    DepthExceeded { frame: u32 },
    /// A snapshot inside the window was never captured. Indicates a caller
    /// bug (frames advanced without capture), not a recoverable condition.
    #[error("snapshot missing for frame {0}")]
    SnapshotMissing(u32),
    #[error(transparent)]
    Sim(#[from] SimError),
}

/// What one `advance` call did.
#[derive(Debug, Clone, Copy)]
pub struct StepReport {
    /// The frame just simulated.
    pub frame: u32,
    pub checksum: u64,
    pub outcome: FrameOutcome,
    /// Whether the remote input for this frame was confirmed or predicted.
    pub remote_kind: InputKind,
    /// Frames replayed before this one advanced (0 in the common case).
    pub resimulated: u32,
    /// Highest frame that is final on both sides; never rolls back.
    pub confirmed_frontier: Option<u32>,
}

/// The central rollback state machine.
///
/// Live state advances one frame per `advance` call; a pending divergence
/// switches to resimulating, replays the affected range with corrected
/// inputs, and returns to live before the call completes.
pub struct RollbackCoordinator<S: Simulation> {
    sim: S,
    local_side: PlayerSide,
    snapshots: SnapshotStore,
    predictions: PredictionStore,
    /// Remote bits actually fed to the simulation, per frame. A late
    /// confirmation is compared against what was used, not against the
    /// current prediction.
    used_remote: BTreeMap<u32, u16>,
    /// Outcome per simulated frame; rewritten during resimulation.
    outcomes: BTreeMap<u32, FrameOutcome>,
    /// Next frame to simulate.
    current: u32,
    /// Earliest frame whose used remote input is known wrong.
    divergence: Option<u32>,
    /// State bytes from just before `base_floor`, for restores at the
    /// window edge (pre-match state, or the resync base).
    base_state: Vec<u8>,
    base_floor: u32,
}

impl<S: Simulation> RollbackCoordinator<S> {
    pub fn new(sim: S, local_side: PlayerSide, snapshot_capacity: usize) -> Result<Self, SimError> {
        let base_state = sim.save_state()?;
        Ok(Self {
            sim,
            local_side,
            snapshots: SnapshotStore::new(snapshot_capacity),
            predictions: PredictionStore::new(),
            used_remote: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            current: 0,
            divergence: None,
            base_state,
            base_floor: 0,
        })
    }

    pub fn local_side(&self) -> PlayerSide {
        self.local_side
    }

    /// Next frame to simulate.
    pub fn current_frame(&self) -> u32 {
        self.current
    }

    /// Record a local input at capture time. `advance` records it too, but
    /// capturing first means the input survives even when the advance for
    /// its frame fails with `DepthExceeded` and the frame is later replayed
    /// after a resync.
    pub fn record_local(&mut self, input: InputFrame) -> Confirmation {
        self.predictions.record_confirmed(self.local_side, input)
    }

    /// Feed a confirmed remote input. Arms a divergence when a past frame's
    /// confirmed bits differ from the bits that were actually used.
    pub fn on_remote_input(&mut self, input: InputFrame) -> Confirmation {
        let remote = self.local_side.opponent();
        let confirmation = self.predictions.record_confirmed(remote, input);
        if confirmation == Confirmation::New
            && input.frame < self.current
            && let Some(&used) = self.used_remote.get(&input.frame)
            && used != input.bits
        {
            let target = self
                .divergence
                .map_or(input.frame, |d| d.min(input.frame));
            trace!(frame = input.frame, used, confirmed = input.bits, "misprediction");
            self.divergence = Some(target);
        }
        confirmation
    }

    /// Run one simulation step with the given local input, resimulating
    /// first if a confirmed remote input invalidated a prediction.
    pub fn advance(&mut self, local: InputFrame) -> Result<StepReport, RollbackError> {
        debug_assert_eq!(local.frame, self.current, "local input out of order");

        let mut resimulated = 0;
        if let Some(from) = self.divergence.take() {
            match self.resimulate(from) {
                Ok(count) => resimulated = count,
                Err(e) => {
                    // Keep the divergence armed: the session layer resolves
                    // it with a full-state resync, after which reset_to
                    // clears it.
                    self.divergence = Some(from);
                    return Err(e);
                }
            }
        }

        self.predictions.record_confirmed(self.local_side, local);
        let (remote_bits, remote_kind) = self
            .predictions
            .input_for(self.local_side.opponent(), self.current);
        let (frame, checksum, outcome) = self.run_frame(local.bits, remote_bits)?;

        if frame.is_multiple_of(PRUNE_INTERVAL) {
            self.prune();
        }

        Ok(StepReport {
            frame,
            checksum,
            outcome,
            remote_kind,
            resimulated,
            confirmed_frontier: self.confirmed_frontier(),
        })
    }

    /// Highest frame that is simulated, confirmed on both sides and not
    /// invalidated by a pending divergence. Frames at or below this value
    /// are final.
    pub fn confirmed_frontier(&self) -> Option<u32> {
        let p1 = self.predictions.confirmed_frontier(PlayerSide::P1)?;
        let p2 = self.predictions.confirmed_frontier(PlayerSide::P2)?;
        let mut frontier = p1.min(p2).min(self.current.checked_sub(1)?);
        if let Some(divergence) = self.divergence {
            frontier = frontier.min(divergence.checked_sub(1)?);
        }
        Some(frontier)
    }

    /// Frame and checksum of the newest final frame still in the window,
    /// for piggybacking on outbound packets.
    pub fn latest_confirmed_checksum(&self) -> Option<(u32, u64)> {
        let frontier = self.confirmed_frontier()?;
        Some((frontier, self.snapshots.checksum(frontier)?))
    }

    pub fn snapshot(&self, frame: u32) -> Result<&StateSnapshot, SnapshotError> {
        self.snapshots.restore(frame)
    }

    /// The local confirmed input for a frame, if still retained. Used by
    /// the session layer to replay already-captured inputs when a resync
    /// rewinds the timeline below the capture counter.
    pub fn confirmed_local(&self, frame: u32) -> Option<u16> {
        self.predictions.confirmed_bits(self.local_side, frame)
    }

    pub fn outcome(&self, frame: u32) -> Option<FrameOutcome> {
        self.outcomes.get(&frame).copied()
    }

    /// Adopt a full state for `frame` wholesale and restart the timeline at
    /// `frame + 1` (the receiving side of a full-state resync).
    pub fn reset_to(&mut self, frame: u32, state: Vec<u8>) -> Result<(), SimError> {
        let checksum = state_checksum(&state);
        self.sim.load_state(&state)?;
        self.snapshots.clear();
        self.snapshots.capture(frame, state.clone(), checksum);
        self.base_state = state;
        self.base_floor = frame + 1;
        self.predictions.prune_before(frame + 1);
        self.used_remote.clear();
        self.outcomes.clear();
        self.divergence = None;
        self.current = frame + 1;
        debug!(frame, "timeline rebased to resync state");
        Ok(())
    }

    /// Rebase the rollback window to `frame` without rewinding (the serving
    /// side of a full-state resync): frames at or below `frame` become
    /// final and can no longer be rolled back.
    pub fn rebase_window(&mut self, frame: u32) {
        self.snapshots.evict_before(frame);
        self.predictions.prune_before(frame + 1);
        self.used_remote.retain(|&f, _| f > frame);
        self.outcomes.retain(|&f, _| f > frame);
        if self.divergence.is_some_and(|d| d <= frame) {
            self.divergence = None;
        }
    }

    /// Drop all match state (session teardown).
    pub fn clear(&mut self) -> Result<(), SimError> {
        self.sim.reset();
        self.base_state = self.sim.save_state()?;
        self.base_floor = 0;
        self.snapshots.clear();
        self.predictions.clear();
        self.used_remote.clear();
        self.outcomes.clear();
        self.divergence = None;
        self.current = 0;
        Ok(())
    }

    /// Replay `from..current` with the best inputs now known.
    fn resimulate(&mut self, from: u32) -> Result<u32, RollbackError> {
        if from == self.base_floor {
            self.sim.load_state(&self.base_state)?;
        } else {
            let snapshot = self.snapshots.restore(from - 1).map_err(|e| match e {
                SnapshotError::FrameTooOld { .. } => RollbackError::DepthExceeded { frame: from },
                SnapshotError::Missing(f) => RollbackError::SnapshotMissing(f),
            })?;
            self.sim.load_state(&snapshot.state)?;
        }

        let end = self.current;
        self.current = from;
        debug!(from, to = end, "resimulating");
        while self.current < end {
            let (local_bits, local_kind) =
                self.predictions.input_for(self.local_side, self.current);
            debug_assert_eq!(
                local_kind,
                InputKind::Confirmed,
                "local inputs are confirmed at capture time"
            );
            let (remote_bits, _) = self
                .predictions
                .input_for(self.local_side.opponent(), self.current);
            self.run_frame(local_bits, remote_bits)?;
        }
        Ok(end - from)
    }

    fn run_frame(
        &mut self,
        local_bits: u16,
        remote_bits: u16,
    ) -> Result<(u32, u64, FrameOutcome), SimError> {
        let frame = self.current;
        let (p1, p2) = match self.local_side {
            PlayerSide::P1 => (local_bits, remote_bits),
            PlayerSide::P2 => (remote_bits, local_bits),
        };
        let outcome = self.sim.advance(&FrameInputs { frame, p1, p2 });
        let state = self.sim.save_state()?;
        let checksum = state_checksum(&state);
        self.snapshots.capture(frame, state, checksum);
        self.used_remote.insert(frame, remote_bits);
        self.outcomes.insert(frame, outcome);
        self.current = frame + 1;
        Ok((frame, checksum, outcome))
    }

    fn prune(&mut self) {
        // Inputs are kept for twice the snapshot window. A confirmation
        // landing in the band just outside the window must still arm a
        // divergence so `advance` surfaces `DepthExceeded` and the session
        // layer resyncs; pruning at the window edge would drop it silently
        // and let the peers diverge with no signal.
        let capacity = self.snapshots.capacity() as u32;
        let floor = self.current.saturating_sub(capacity * 2);
        if floor > self.base_floor {
            self.predictions.prune_before(floor);
            self.used_remote.retain(|&f, _| f >= floor);
            self.outcomes.retain(|&f, _| f >= floor);
        }
    }
}
