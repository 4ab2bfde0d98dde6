//! Peer session identity and liveness.

use std::time::{Duration, Instant};

use kumite_core::PlayerSide;

/// Which end of the session this peer is. Decided deterministically from
/// the signaling-assigned peer ids (the lower id hosts), so both peers
/// agree symmetrically without negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Host,
    Guest,
}

/// Default time with no inbound packets before the connection is declared
/// dead.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// One match's peer pairing. Created once per match; destroyed on
/// disconnect or match end.
#[derive(Debug)]
pub struct PeerSession {
    pub session_code: u32,
    pub local_id: u32,
    pub remote_id: u32,
    pub role: PeerRole,
    liveness_timeout: Duration,
    created: Instant,
    last_inbound: Option<Instant>,
}

impl PeerSession {
    pub fn new(session_code: u32, local_id: u32, remote_id: u32, now: Instant) -> Self {
        debug_assert_ne!(local_id, remote_id);
        let role = if local_id < remote_id {
            PeerRole::Host
        } else {
            PeerRole::Guest
        };
        Self {
            session_code,
            local_id,
            remote_id,
            role,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            created: now,
            last_inbound: None,
        }
    }

    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Host plays P1; guest plays P2.
    pub fn local_side(&self) -> PlayerSide {
        match self.role {
            PeerRole::Host => PlayerSide::P1,
            PeerRole::Guest => PlayerSide::P2,
        }
    }

    pub fn note_inbound(&mut self, now: Instant) {
        self.last_inbound = Some(now);
    }

    /// False once the liveness timeout has elapsed with no inbound packets.
    pub fn is_alive(&self, now: Instant) -> bool {
        let reference = self.last_inbound.unwrap_or(self.created);
        now.saturating_duration_since(reference) < self.liveness_timeout
    }
}
