//! Peer-to-peer session layer for the rollback core.
//!
//! Glues `kumite-core` to the wire: a QUIC-datagram peer transport (plus an
//! in-memory pair for tests and same-process sessions), the signaling
//! client used for session bootstrap, the jitter buffer, network
//! statistics, and the match runner thread that drives the fixed-step loop.
//!
//! # Architecture
//!
//! - [`transport`]: the unreliable/ordered peer channel abstraction
//! - [`signaling`]: out-of-band offer/answer/candidate exchange
//! - [`jitter`]: arrival smoothing for remote input packets
//! - [`session`]: peer identity, deterministic role assignment, liveness
//! - [`stats`]: RTT/jitter/loss telemetry
//! - [`config`]: hot-swappable tuning knobs
//! - [`resync`]: full-state resynchronization fragments
//! - [`runner`]: the match loop tying everything together

pub mod config;
pub mod error;
pub mod jitter;
pub mod resync;
pub mod runner;
pub mod session;
pub mod signaling;
pub mod stats;
pub mod transport;

pub use config::{SharedTuning, TuningConfig};
pub use error::{NetplayError, TransportError};
pub use jitter::JitterBuffer;
pub use runner::{MatchConfig, MatchEvent, MatchRunner, MatchSession};
pub use session::{PeerRole, PeerSession};
pub use stats::{SessionStats, SharedStats};
pub use transport::{ConnectionState, EndpointDescriptor, PeerTransport};
