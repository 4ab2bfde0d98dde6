use serde::{Deserialize, Serialize};

/// Why a full-state resynchronization was requested.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    /// A confirmed input landed outside the requester's rollback window.
    DepthExceeded,
    /// The session layer chose to resync after a checksum mismatch.
    DesyncRecovery,
}

/// Ask the peer to serialize and ship its newest confirmed state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ResyncRequest {
    /// Oldest frame the requester can still restore; informational.
    pub from_frame: u32,
    pub reason: ResyncReason,
}

/// One fragment of an lz4-compressed full state snapshot.
///
/// Fragments of one resync share a `resync_id`; a stale id aborts any
/// half-assembled predecessor.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StateFrag {
    pub resync_id: u32,
    pub frag_index: u16,
    pub frag_count: u16,
    /// Frame the serialized state corresponds to; both sides rebase their
    /// windows to it.
    pub frame: u32,
    /// Checksum of the uncompressed state bytes, verified on reassembly.
    pub checksum: u64,
    pub uncompressed_len: u32,
    pub data: Vec<u8>,
}
