//! Shared test fixture: a minimal deterministic fighting simulation.

use kumite_core::{FrameInputs, FrameOutcome, PlayerSide, SimError, Simulation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuelState {
    pub frame: u32,
    pub positions: [i32; 2],
    pub health: [i32; 2],
}

impl Default for DuelState {
    fn default() -> Self {
        Self {
            frame: 0,
            positions: [-100, 100],
            health: [100, 100],
        }
    }
}

/// Directions move, attack bits chip the opponent, a player wins when the
/// opponent's health reaches zero. Pure function of (state, inputs).
#[derive(Debug, Default)]
pub struct DuelSim {
    state: DuelState,
}

impl Simulation for DuelSim {
    fn advance(&mut self, inputs: &FrameInputs) -> FrameOutcome {
        let bits = [inputs.p1, inputs.p2];
        for (i, b) in bits.iter().enumerate() {
            if b & 0x04 != 0 {
                self.state.positions[i] -= 2;
            }
            if b & 0x08 != 0 {
                self.state.positions[i] += 2;
            }
            let damage = (b >> 4).count_ones() as i32;
            self.state.health[1 - i] -= damage;
        }
        self.state.frame += 1;
        let victory = if self.state.health[1] <= 0 {
            Some(PlayerSide::P1)
        } else if self.state.health[0] <= 0 {
            Some(PlayerSide::P2)
        } else {
            None
        };
        FrameOutcome { victory }
    }

    fn save_state(&self) -> Result<Vec<u8>, SimError> {
        postcard::to_stdvec(&self.state).map_err(|e| SimError::Serialize(e.to_string()))
    }

    fn load_state(&mut self, bytes: &[u8]) -> Result<(), SimError> {
        self.state =
            postcard::from_bytes(bytes).map_err(|e| SimError::Deserialize(e.to_string()))?;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = DuelState::default();
    }
}
