//! Wire protocol shared by the two peers and the signaling daemon.
//!
//! Every packet is `[Header][postcard payload]`. Datagrams (peer-to-peer
//! match traffic) carry exactly one packet; the signaling TCP stream frames
//! each packet with a u32-LE length prefix.

pub mod codec_dgram;
pub mod codec_tcp;
pub mod constants;
pub mod error;
pub mod header;
pub mod limits;
pub mod messages;
pub mod msg_id;
pub mod packet;
