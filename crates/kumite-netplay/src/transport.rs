//! Peer-to-peer transport abstraction.
//!
//! The match channel is unreliable and unordered: small datagrams, no
//! retransmission (input bursts are redundant instead). The receive side
//! of every implementation only ever pushes into a bounded queue and
//! never calls back into the session, which keeps the simulation loop the
//! single writer over match state.

pub mod memory;
pub mod quic;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use crossbeam_channel::Receiver;

use crate::error::TransportError;

/// Depth of the inbound datagram queue. The queue is drained at the start
/// of every tick; overflow drops datagrams, which the unreliable channel
/// already tolerates.
pub(crate) const INBOUND_QUEUE_DEPTH: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Disconnected => 3,
            Self::Failed => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnected,
            4 => Self::Failed,
            _ => Self::New,
        }
    }
}

/// Shared connection-state cell, writable from transport tasks and
/// readable from the simulation thread.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state.as_u8())))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// Where and how to dial a peer: published through signaling as an
/// `Offer`, consumed by the guest's transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Addresses to try, in order.
    pub addrs: Vec<SocketAddr>,
    /// Leaf certificate SHA-256 fingerprint (base64url, no padding).
    pub cert_sha256: String,
    /// SNI for the handshake; pinning does not rely on SAN validation.
    pub server_name: String,
}

/// The peer-to-peer unreliable channel.
pub trait PeerTransport: Send + Sync {
    /// Queue one datagram for the peer. Best-effort: delivery and ordering
    /// are not guaranteed.
    fn send(&self, datagram: Bytes) -> Result<(), TransportError>;

    /// The bounded queue the receive task pushes into. Drained exclusively
    /// by the simulation loop.
    fn incoming(&self) -> &Receiver<Bytes>;

    fn state(&self) -> ConnectionState;

    /// ICE-restart analog: rebind/re-dial the pinned peer without tearing
    /// down match state.
    fn restart(&self) -> Result<(), TransportError>;

    /// Tear the connection down. After this returns no further queue
    /// pushes happen.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_the_cell() {
        let cell = StateCell::new(ConnectionState::New);
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Failed,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }
}
