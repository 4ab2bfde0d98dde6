//! Round and set state machine.
//!
//! Driven synchronously by the same fixed-step loop that runs the
//! simulation; it has no concurrency of its own. Transitions are total:
//! every victory event produces exactly one phase transition.

use tracing::info;

use crate::sim::PlayerSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundPhase {
    #[default]
    PreRound,
    Fighting,
    RoundOver,
    SetOver,
}

#[derive(Debug)]
pub struct RoundStateMachine {
    rounds_won: [u8; 2],
    current_round: u8,
    phase: RoundPhase,
    rounds_to_win: u8,
}

impl Default for RoundStateMachine {
    fn default() -> Self {
        Self::new(2)
    }
}

impl RoundStateMachine {
    pub fn new(rounds_to_win: u8) -> Self {
        Self {
            rounds_won: [0, 0],
            current_round: 0,
            phase: RoundPhase::PreRound,
            rounds_to_win: rounds_to_win.max(1),
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn rounds_won(&self) -> [u8; 2] {
        self.rounds_won
    }

    pub fn current_round(&self) -> u8 {
        self.current_round
    }

    /// PreRound -> Fighting once both peers are connected and frame 0 runs.
    pub fn start(&mut self) {
        if self.phase == RoundPhase::PreRound {
            self.phase = RoundPhase::Fighting;
        }
    }

    /// A victory event surfaced by the simulation. Increments the winner's
    /// counter and moves to `SetOver` at the threshold, else `RoundOver`.
    /// Accepted in any phase so transitions stay total even when a victory
    /// lands while still in `RoundOver`.
    pub fn on_victory(&mut self, winner: PlayerSide) -> RoundPhase {
        let wins = &mut self.rounds_won[winner.index()];
        *wins = wins.saturating_add(1);
        self.phase = if *wins >= self.rounds_to_win {
            RoundPhase::SetOver
        } else {
            RoundPhase::RoundOver
        };
        info!(
            winner = ?winner,
            rounds_won = ?self.rounds_won,
            phase = ?self.phase,
            "round decided"
        );
        self.phase
    }

    /// RoundOver -> Fighting, after the external round reset.
    pub fn next_round(&mut self) {
        if self.phase == RoundPhase::RoundOver {
            self.current_round = self.current_round.saturating_add(1);
            self.phase = RoundPhase::Fighting;
        }
    }

    /// Rematch: zero both counters and return to PreRound.
    pub fn reset_rounds(&mut self) {
        self.rounds_won = [0, 0];
        self.current_round = 0;
        self.phase = RoundPhase::PreRound;
    }
}
