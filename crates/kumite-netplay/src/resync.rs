//! Full-state resynchronization: fragmentation and reassembly.
//!
//! When a confirmed input lands outside the rollback window, the requester
//! asks the peer for its newest confirmed state. The state is
//! lz4-compressed and fragmented below the datagram ceiling; the requester
//! reassembles, verifies the checksum, and rebases its timeline.

use kumite_core::state_checksum;
use kumite_netproto::messages::resync::StateFrag;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::error::NetplayError;

/// Compressed bytes carried per fragment. Leaves headroom for the packet
/// header and the postcard envelope inside the datagram payload ceiling.
pub const FRAG_DATA_LEN: usize = 1000;

/// Compress and split a serialized state into datagram-sized fragments.
pub fn fragment_state(resync_id: u32, frame: u32, state: &[u8]) -> Vec<StateFrag> {
    let checksum = state_checksum(state);
    let compressed = compress_prepend_size(state);
    let frag_count = compressed.len().div_ceil(FRAG_DATA_LEN).max(1) as u16;
    compressed
        .chunks(FRAG_DATA_LEN)
        .enumerate()
        .map(|(i, chunk)| StateFrag {
            resync_id,
            frag_index: i as u16,
            frag_count,
            frame,
            checksum,
            uncompressed_len: state.len() as u32,
            data: chunk.to_vec(),
        })
        .collect()
}

/// Receiver-side reassembly of one resync's fragments. Tolerates duplicate
/// and out-of-order fragments; a new `resync_id` replaces the assembly.
#[derive(Debug)]
pub struct ResyncAssembly {
    resync_id: u32,
    frame: u32,
    checksum: u64,
    uncompressed_len: u32,
    fragments: Vec<Option<Vec<u8>>>,
    received: u16,
}

impl ResyncAssembly {
    pub fn new(first: &StateFrag) -> Self {
        Self {
            resync_id: first.resync_id,
            frame: first.frame,
            checksum: first.checksum,
            uncompressed_len: first.uncompressed_len,
            fragments: vec![None; usize::from(first.frag_count.max(1))],
            received: 0,
        }
    }

    pub fn resync_id(&self) -> u32 {
        self.resync_id
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Accept one fragment. Returns the verified uncompressed state once
    /// every fragment has arrived.
    pub fn accept(&mut self, frag: StateFrag) -> Result<Option<Vec<u8>>, NetplayError> {
        if frag.resync_id != self.resync_id {
            return Err(NetplayError::Resync("fragment from a different resync".into()));
        }
        let idx = usize::from(frag.frag_index);
        let Some(slot) = self.fragments.get_mut(idx) else {
            return Err(NetplayError::Resync(format!(
                "fragment index {} out of range ({})",
                frag.frag_index,
                self.fragments.len()
            )));
        };
        if slot.is_none() {
            *slot = Some(frag.data);
            self.received += 1;
        }
        if usize::from(self.received) < self.fragments.len() {
            return Ok(None);
        }

        let mut compressed = Vec::new();
        for fragment in &self.fragments {
            let data = fragment
                .as_ref()
                .ok_or_else(|| NetplayError::Resync("incomplete assembly".into()))?;
            compressed.extend_from_slice(data);
        }
        let state = decompress_size_prepended(&compressed)
            .map_err(|e| NetplayError::Resync(format!("decompression failed: {e}")))?;
        if state.len() != self.uncompressed_len as usize {
            return Err(NetplayError::Resync(format!(
                "decompressed length {} != announced {}",
                state.len(),
                self.uncompressed_len
            )));
        }
        if state_checksum(&state) != self.checksum {
            return Err(NetplayError::Resync("state checksum mismatch".into()));
        }
        Ok(Some(state))
    }
}
