//! Session-layer error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("transport closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum NetplayError {
    #[error("protocol error: {0}")]
    Proto(#[from] kumite_netproto::error::ProtoError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Rollback(#[from] kumite_core::RollbackError),

    #[error(transparent)]
    Sim(#[from] kumite_core::SimError),

    #[error("signaling failed: {0}")]
    Signaling(String),

    #[error("state resync failed: {0}")]
    Resync(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed")]
    ChannelClosed,
}
