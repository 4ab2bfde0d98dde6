//! Per-frame checksum exchange bookkeeping.
//!
//! Checksums ride on the same packets that carry input acknowledgements,
//! so only a sparse subset of frames ever has both sides present; frames
//! with a single side are simply never compared. The first mismatch is
//! latched and reported upward exactly once. The validator never attempts
//! correction: a desync is a bug in the simulation function, and masking it
//! would hide the bug.

use std::collections::BTreeMap;

use tracing::error;

/// A detected desynchronization at one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesyncReport {
    pub frame: u32,
    pub local: u64,
    pub remote: u64,
}

#[derive(Debug, Default)]
pub struct DeterminismValidator {
    local: BTreeMap<u32, u64>,
    remote: BTreeMap<u32, u64>,
    last_validated: Option<u32>,
    mismatch: Option<DesyncReport>,
    mismatch_reported: bool,
}

impl DeterminismValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the locally computed checksum for a finalized frame.
    pub fn record_local_checksum(&mut self, frame: u32, checksum: u64) -> Option<DesyncReport> {
        self.local.insert(frame, checksum);
        self.compare(frame)
    }

    /// Record the checksum the peer reported for a frame.
    pub fn record_remote_checksum(&mut self, frame: u32, checksum: u64) -> Option<DesyncReport> {
        self.remote.insert(frame, checksum);
        self.compare(frame)
    }

    /// Highest frame whose checksums matched on both sides (0 before any
    /// frame has validated).
    pub fn last_validated_frame(&self) -> u32 {
        self.last_validated.unwrap_or(0)
    }

    /// Frame of the first detected mismatch, or −1 when none.
    pub fn last_mismatch_frame(&self) -> i64 {
        self.mismatch.map_or(-1, |m| i64::from(m.frame))
    }

    /// Drop pending entries below `frame` (resync rebase).
    pub fn prune_before(&mut self, frame: u32) {
        self.local = self.local.split_off(&frame);
        self.remote = self.remote.split_off(&frame);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn compare(&mut self, frame: u32) -> Option<DesyncReport> {
        let (&local, &remote) = (self.local.get(&frame)?, self.remote.get(&frame)?);
        self.local.remove(&frame);
        self.remote.remove(&frame);

        if local == remote {
            if self.last_validated.is_none_or(|v| frame > v) {
                self.last_validated = Some(frame);
            }
            // Older one-sided entries can never validate once a later
            // frame has; drop them so the maps stay bounded.
            self.local = self.local.split_off(&frame);
            self.remote = self.remote.split_off(&frame);
            return None;
        }

        error!(frame, local, remote, "state checksum mismatch");
        let report = DesyncReport {
            frame,
            local,
            remote,
        };
        if self.mismatch.is_none_or(|m| frame < m.frame) {
            self.mismatch = Some(report);
        }
        if self.mismatch_reported {
            return None;
        }
        self.mismatch_reported = true;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_checksums_advance_validation() {
        let mut v = DeterminismValidator::new();
        assert_eq!(v.record_local_checksum(10, 0xAB), None);
        assert_eq!(v.record_remote_checksum(10, 0xAB), None);
        assert_eq!(v.last_validated_frame(), 10);
        assert_eq!(v.last_mismatch_frame(), -1);
    }

    #[test]
    fn one_sided_checksums_never_compare() {
        let mut v = DeterminismValidator::new();
        for frame in 0..50 {
            assert_eq!(v.record_local_checksum(frame, frame as u64), None);
        }
        assert_eq!(v.last_validated_frame(), 0);
    }

    #[test]
    fn first_mismatch_reports_exactly_once() {
        let mut v = DeterminismValidator::new();
        v.record_local_checksum(7, 1);
        let report = v.record_remote_checksum(7, 2);
        assert_eq!(
            report,
            Some(DesyncReport {
                frame: 7,
                local: 1,
                remote: 2
            })
        );
        assert_eq!(v.last_mismatch_frame(), 7);

        // Later mismatches are latched but not re-reported.
        v.record_local_checksum(9, 3);
        assert_eq!(v.record_remote_checksum(9, 4), None);
        assert_eq!(v.last_mismatch_frame(), 7);
    }

    #[test]
    fn gaps_are_tolerated() {
        let mut v = DeterminismValidator::new();
        v.record_local_checksum(5, 0x1);
        v.record_local_checksum(9, 0x2);
        // The peer only ever echoes frame 9.
        assert_eq!(v.record_remote_checksum(9, 0x2), None);
        assert_eq!(v.last_validated_frame(), 9);
    }

    #[test]
    fn clear_resets_the_latch() {
        let mut v = DeterminismValidator::new();
        v.record_local_checksum(3, 1);
        v.record_remote_checksum(3, 2);
        v.clear();
        assert_eq!(v.last_mismatch_frame(), -1);
        assert_eq!(v.last_validated_frame(), 0);
    }
}
