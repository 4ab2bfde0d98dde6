//! The opaque simulation contract.
//!
//! The combat simulation is swappable: the core only requires that it
//! advances deterministically and can serialize/restore its full state.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// One of the two players in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerSide {
    P1,
    P2,
}

impl PlayerSide {
    pub fn opponent(self) -> Self {
        match self {
            Self::P1 => Self::P2,
            Self::P2 => Self::P1,
        }
    }

    /// Array index (P1 = 0, P2 = 1).
    pub fn index(self) -> usize {
        match self {
            Self::P1 => 0,
            Self::P2 => 1,
        }
    }
}

/// Both players' input bits for one simulation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInputs {
    pub frame: u32,
    pub p1: u16,
    pub p2: u16,
}

/// What one advanced frame reported back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Set when this frame's output indicates a KO/timeout.
    pub victory: Option<PlayerSide>,
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("state serialization failed: {0}")]
    Serialize(String),
    #[error("state deserialization failed: {0}")]
    Deserialize(String),
}

/// The opaque combat simulation.
///
/// Determinism contract: advancing from state `A` with inputs `I` must
/// always produce the same state `B`, and `save_state` must be canonical
/// (equal states serialize to equal bytes). Rollback resimulation relies on
/// both properties to reproduce bit-identical state and checksums.
pub trait Simulation {
    /// Advance exactly one frame using the given inputs.
    fn advance(&mut self, inputs: &FrameInputs) -> FrameOutcome;

    /// Serialize the complete simulation state.
    fn save_state(&self) -> Result<Vec<u8>, SimError>;

    /// Restore state previously produced by `save_state`.
    fn load_state(&mut self, bytes: &[u8]) -> Result<(), SimError>;

    /// Return to the initial pre-match state.
    fn reset(&mut self);
}

/// Per-frame state checksum: SHA-1 of the canonical state bytes, truncated
/// to the first 8 bytes (little-endian).
pub fn state_checksum(state: &[u8]) -> u64 {
    let digest = Sha1::digest(state);
    let bytes: [u8; 8] = digest[..8].try_into().expect("SHA-1 digest is 20 bytes");
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_and_input_sensitive() {
        let a = state_checksum(b"state one");
        let b = state_checksum(b"state one");
        let c = state_checksum(b"state two");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn side_helpers() {
        assert_eq!(PlayerSide::P1.opponent(), PlayerSide::P2);
        assert_eq!(PlayerSide::P2.opponent(), PlayerSide::P1);
        assert_eq!(PlayerSide::P1.index(), 0);
        assert_eq!(PlayerSide::P2.index(), 1);
    }
}
