//! Bounded ring of restorable per-frame state snapshots.
//!
//! Capacity bounds the maximum rollback depth and is the only memory cap
//! needed: slots are reused in place as frames advance. Capacity must
//! exceed the worst plausible RTT in frames times two, plus the jitter
//! window, or a slow peer will force full-state resyncs.

use thiserror::Error;

/// Default capacity: two seconds of frames at 60 Hz.
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 120;

/// A complete, restorable copy of simulation state at one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub frame: u32,
    pub state: Vec<u8>,
    pub checksum: u64,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotError {
    /// The requested frame has been overwritten by newer captures.
    #[error("frame {frame} is outside the snapshot window (newest {newest})")]
    FrameTooOld { frame: u32, newest: u32 },
    /// The frame was never captured (or the store was cleared).
    #[error("no snapshot captured for frame {0}")]
    Missing(u32),
}

/// Fixed-capacity ring indexed by `frame % capacity`.
#[derive(Debug)]
pub struct SnapshotStore {
    slots: Vec<Option<StateSnapshot>>,
    newest: Option<u32>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_CAPACITY)
    }
}

impl SnapshotStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            newest: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn newest_frame(&self) -> Option<u32> {
        self.newest
    }

    /// Store a snapshot, silently evicting whatever occupied the slot.
    pub fn capture(&mut self, frame: u32, state: Vec<u8>, checksum: u64) {
        let idx = frame as usize % self.slots.len();
        self.slots[idx] = Some(StateSnapshot {
            frame,
            state,
            checksum,
        });
        if self.newest.is_none_or(|newest| frame > newest) {
            self.newest = Some(frame);
        }
    }

    /// Fetch the snapshot for `frame`.
    ///
    /// Fails with `FrameTooOld` exactly when `frame + capacity <= newest`,
    /// i.e. the slot has provably been overwritten.
    pub fn restore(&self, frame: u32) -> Result<&StateSnapshot, SnapshotError> {
        if let Some(newest) = self.newest
            && frame as u64 + self.slots.len() as u64 <= newest as u64
        {
            return Err(SnapshotError::FrameTooOld { frame, newest });
        }
        let idx = frame as usize % self.slots.len();
        match &self.slots[idx] {
            Some(snapshot) if snapshot.frame == frame => Ok(snapshot),
            _ => Err(SnapshotError::Missing(frame)),
        }
    }

    pub fn checksum(&self, frame: u32) -> Option<u64> {
        self.restore(frame).ok().map(|s| s.checksum)
    }

    /// Drop snapshots older than `frame` (used when a resync rebases the
    /// window; normal play relies on slot reuse instead).
    pub fn evict_before(&mut self, frame: u32) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|s| s.frame < frame) {
                *slot = None;
            }
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.newest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture_range(store: &mut SnapshotStore, frames: std::ops::RangeInclusive<u32>) {
        for frame in frames {
            store.capture(frame, vec![frame as u8], frame as u64);
        }
    }

    #[test]
    fn restore_within_window() {
        let mut store = SnapshotStore::new(8);
        capture_range(&mut store, 0..=7);
        for frame in 0..=7 {
            assert_eq!(store.restore(frame).map(|s| s.frame), Ok(frame));
        }
    }

    #[test]
    fn too_old_iff_outside_capacity() {
        let mut store = SnapshotStore::new(8);
        capture_range(&mut store, 0..=19);

        // newest = 19, capacity = 8: frames <= 11 are out of the window.
        assert_eq!(
            store.restore(11),
            Err(SnapshotError::FrameTooOld {
                frame: 11,
                newest: 19
            })
        );
        assert!(store.restore(12).is_ok());
        assert!(store.restore(19).is_ok());
    }

    #[test]
    fn missing_is_distinct_from_too_old() {
        let mut store = SnapshotStore::new(8);
        store.capture(3, vec![3], 3);
        // Frame 2 is inside the window but was never captured.
        assert_eq!(store.restore(2), Err(SnapshotError::Missing(2)));
    }

    #[test]
    fn evict_before_drops_old_frames_only() {
        let mut store = SnapshotStore::new(16);
        capture_range(&mut store, 0..=9);
        store.evict_before(5);
        assert_eq!(store.restore(4), Err(SnapshotError::Missing(4)));
        assert!(store.restore(5).is_ok());
        assert_eq!(store.newest_frame(), Some(9));
    }

    #[test]
    fn clear_empties_everything() {
        let mut store = SnapshotStore::new(4);
        capture_range(&mut store, 0..=3);
        store.clear();
        assert_eq!(store.newest_frame(), None);
        assert_eq!(store.restore(0), Err(SnapshotError::Missing(0)));
    }
}
