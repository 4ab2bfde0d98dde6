use serde::{Deserialize, Serialize};

/// A finalized frame number and the state checksum it produced, piggybacked
/// on input traffic for cheap, amortized determinism validation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct FrameChecksum {
    pub frame: u32,
    pub sum: u64,
}

/// A short run of the sender's most recent input frames.
///
/// Sent every tick over the unreliable channel. The run is redundant on
/// purpose: each burst re-carries frames starting at the peer's last
/// reported `ack_frame` (up to [`MAX_BURST_FRAMES`]), so a lost datagram
/// costs nothing as long as any later one arrives. The receiver must
/// tolerate duplicate and out-of-order delivery.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InputBurst {
    /// Frame number of `bits[0]`; `bits[i]` belongs to `start_frame + i`.
    pub start_frame: u32,
    pub bits: Vec<u16>,
    /// Next frame the sender still needs from the peer (everything below
    /// it has been received in order). The peer trims its redundant-send
    /// window to frames at or after this.
    pub ack_frame: u32,
    /// The sender's most recently finalized frame's checksum, when one
    /// exists.
    pub checksum: Option<FrameChecksum>,
}

/// Upper bound on frames carried per burst. Bounds both the payload size
/// and the catch-up rate after a loss streak.
pub const MAX_BURST_FRAMES: usize = 8;
