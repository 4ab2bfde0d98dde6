//! In-process transport pair for tests and same-machine sessions.

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use super::{ConnectionState, INBOUND_QUEUE_DEPTH, PeerTransport, StateCell};
use crate::error::TransportError;

/// One end of a connected in-memory pair. Faithful to the unreliable
/// channel contract: a full peer queue drops the datagram instead of
/// blocking.
#[derive(Debug)]
pub struct MemoryTransport {
    to_peer: Sender<Bytes>,
    from_peer: Receiver<Bytes>,
    /// Shared by both ends so `close` on either side is visible to both.
    state: StateCell,
}

impl MemoryTransport {
    /// A connected pair sharing bounded queues.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = bounded(INBOUND_QUEUE_DEPTH);
        let (b_tx, b_rx) = bounded(INBOUND_QUEUE_DEPTH);
        let state = StateCell::new(ConnectionState::Connected);
        (
            Self {
                to_peer: b_tx,
                from_peer: a_rx,
                state: state.clone(),
            },
            Self {
                to_peer: a_tx,
                from_peer: b_rx,
                state,
            },
        )
    }

    /// Simulate a link failure for tests.
    pub fn sever(&self) {
        self.state.set(ConnectionState::Disconnected);
    }
}

impl PeerTransport for MemoryTransport {
    fn send(&self, datagram: Bytes) -> Result<(), TransportError> {
        if self.state.get() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        match self.to_peer.try_send(datagram) {
            Ok(()) => Ok(()),
            // Queue overflow is packet loss, not an error.
            Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::Closed),
        }
    }

    fn incoming(&self) -> &Receiver<Bytes> {
        &self.from_peer
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn restart(&self) -> Result<(), TransportError> {
        self.state.set(ConnectionState::Connected);
        Ok(())
    }

    fn close(&self) {
        self.state.set(ConnectionState::Disconnected);
    }
}
