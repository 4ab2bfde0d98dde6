//! Out-of-band signaling messages, relayed by `kumite-signald`.
//!
//! The daemon pairs the first two peers that join a session code and then
//! relays `Offer`/`Answer`/`Candidate` verbatim between them, mirroring how
//! a browser exchanges SDP and ICE candidates through a signaling server.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Join a session code on the signaling server.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Join {
    pub session_code: u32,
    pub nonce: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JoinAck {
    pub ok: bool,
    /// Server-assigned peer identifier. Also decides roles: the lower id
    /// hosts, so both peers agree symmetrically without negotiation.
    pub peer_id: u32,
    pub session_code: u32,
    /// Peers currently in the session, including this one.
    pub peer_count: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct PeerJoined {
    pub peer_id: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct PeerLeft {
    pub peer_id: u32,
}

/// The host's endpoint descriptor: where to dial and what certificate to
/// pin. Re-published with a fresh nonce on an ICE-restart analog.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Offer {
    /// Addresses the guest should try, in order.
    pub addrs: Vec<SocketAddr>,
    /// Leaf certificate SHA-256 fingerprint (base64url, no padding). The
    /// guest pins this instead of trusting any root store.
    pub cert_sha256: String,
    /// SNI/server_name for the QUIC handshake; pinning mode does not rely
    /// on SAN validation.
    pub server_name: String,
    pub nonce: u32,
}

/// The guest's reply: its own reachable addresses for symmetric dialing.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Answer {
    pub addrs: Vec<SocketAddr>,
    pub nonce: u32,
}

/// An additional address discovered after the offer/answer exchange.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct Candidate {
    pub addr: SocketAddr,
}

/// Server error codes sent to peers.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Unspecified error
    Unknown = 0,
    /// Message parsing/decoding failed
    BadMessage = 1,
    /// Session with the given code does not exist
    SessionNotFound = 2,
    /// Session already has two peers
    SessionFull = 3,
    /// Sender has not joined a session yet
    NotInSession = 4,
    /// Invalid protocol state for this operation
    InvalidState = 5,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ErrorMsg {
    pub code: ErrorCode,
}

/// Orderly goodbye, sent on teardown over both channels.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct Bye {
    pub reason_code: u8,
}

/// Maximum number of addresses allowed in Offer/Answer.
pub const MAX_ENDPOINT_ADDRS: usize = 8;
