//! Deterministic rollback-netcode core for a two-player fighting game.
//!
//! This crate is pure data structures driven by a caller-owned fixed-step
//! loop: no I/O, no async, no clocks other than the [`Instant`]s the caller
//! passes in. The session layer (`kumite-netplay`) owns the loop and wires
//! the transport to these pieces.
//!
//! # Architecture
//!
//! - [`clock`]: wall time -> whole fixed simulation steps, with a catch-up clamp
//! - [`input`]: packed input frames, capture and shaping (SOCD, negative edge)
//! - [`predict`]: confirmed remote inputs plus hold-last-input prediction
//! - [`snapshot`]: bounded ring of restorable per-frame state snapshots
//! - [`rollback`]: divergence detection and resimulation
//! - [`validator`]: per-frame checksum exchange bookkeeping
//! - [`round`]: round/set state machine driven by simulation victory events
//! - [`sim`]: the opaque, swappable simulation contract
//!
//! [`Instant`]: std::time::Instant

pub mod clock;
pub mod input;
pub mod predict;
pub mod rollback;
pub mod round;
pub mod sim;
pub mod snapshot;
pub mod validator;

pub use clock::{ClockConfig, FixedSimulationClock};
pub use input::{Button, InputFrame, InputSource, ShapingConfig, SocdPolicy};
pub use predict::{Confirmation, InputKind, PredictionStore};
pub use rollback::{RollbackCoordinator, RollbackError, StepReport};
pub use round::{RoundPhase, RoundStateMachine};
pub use sim::{FrameInputs, FrameOutcome, PlayerSide, SimError, Simulation, state_checksum};
pub use snapshot::{SnapshotError, SnapshotStore, StateSnapshot};
pub use validator::{DesyncReport, DeterminismValidator};
