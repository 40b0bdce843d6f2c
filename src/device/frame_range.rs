//! Frame-buffer range planner (C4, §4.3).
//!
//! The device exposes a fixed number of frame-buffer slots shared by every
//! channel. When a channel's [`FrameRange`](crate::channel::FrameRange) is
//! auto (`start == end`), the planner scans for an unused contiguous
//! window sized for `ring_size * multiplier` slots, where `multiplier`
//! accounts for quad and quad-quad channel groups consuming 4 or 8 slots
//! per "logical" frame (§4.5.2 step 5).

use std::collections::BTreeMap;

use crate::channel::Multiplier;
use crate::Error;

/// Tracks which frame-buffer slots are currently assigned, across every
/// channel on one device (§4.3 "single shared planner per device").
#[derive(Debug)]
pub struct FrameRangePlanner {
    total_frames: u32,
    /// Assigned windows keyed by start frame, recording their length, so
    /// overlap checks are a simple range scan.
    assigned: BTreeMap<u32, u32>,
}

impl FrameRangePlanner {
    pub fn new(total_frames: u32) -> Self {
        Self {
            total_frames,
            assigned: BTreeMap::new(),
        }
    }

    /// Finds and reserves the first unused window of `ring_size *
    /// multiplier` contiguous slots whose starting index is itself a
    /// multiple of `multiplier`, returning its inclusive
    /// `(start_frame, end_frame)` (§4.3: "starting index is a multiple of
    /// the requesting channel's multiplier").
    pub fn plan(&mut self, ring_size: u32, multiplier: Multiplier) -> Result<(u32, u32), Error> {
        let needed = ring_size
            .checked_mul(multiplier.as_u32())
            .ok_or_else(|| Error::FatalConfig("frame range size overflow".into()))?;
        if needed == 0 || needed > self.total_frames {
            return Err(Error::FatalConfig(format!(
                "requested frame range of {needed} slots exceeds the {} available",
                self.total_frames
            )));
        }

        let align = multiplier.as_u32().max(1);
        let mut candidate = 0u32;
        loop {
            if candidate % align != 0 {
                candidate = (candidate / align + 1) * align;
            }

            if candidate.checked_add(needed).map_or(true, |end| end > self.total_frames) {
                return Err(Error::FatalConfig(format!(
                    "no unused window of {needed} contiguous slots, aligned to {align}, remains"
                )));
            }

            let window_end = candidate + needed - 1;
            let overlap = self
                .assigned
                .iter()
                .find(|&(&start, &len)| candidate <= start + len - 1 && start <= window_end);

            match overlap {
                Some((&start, &len)) => candidate = start + len,
                None => break,
            }
        }

        let end = candidate + needed - 1;
        self.assigned.insert(candidate, needed);
        Ok((candidate, end))
    }

    /// Reserves an explicit, caller-chosen window (manual allocation,
    /// §3), failing if it overlaps an existing assignment.
    pub fn reserve(&mut self, start: u32, end: u32) -> Result<(), Error> {
        if end < start || end >= self.total_frames {
            return Err(Error::FatalConfig(format!(
                "frame range {start}..={end} is out of bounds (0..{})",
                self.total_frames
            )));
        }
        let len = end - start + 1;
        for (&other_start, &other_len) in &self.assigned {
            let other_end = other_start + other_len - 1;
            if start <= other_end && other_start <= end {
                return Err(Error::FatalConfig(format!(
                    "frame range {start}..={end} overlaps existing allocation {other_start}..={other_end}"
                )));
            }
        }
        self.assigned.insert(start, len);
        Ok(())
    }

    /// Releases a previously planned or reserved window.
    pub fn release(&mut self, start: u32) {
        self.assigned.remove(&start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_contiguous_non_overlapping_windows() {
        let mut planner = FrameRangePlanner::new(64);
        let (s1, e1) = planner.plan(8, Multiplier::Single).unwrap();
        assert_eq!((s1, e1), (0, 7));
        let (s2, e2) = planner.plan(8, Multiplier::Quad).unwrap();
        assert_eq!((s2, e2), (8, 39));
    }

    #[test]
    fn reuses_released_window() {
        let mut planner = FrameRangePlanner::new(16);
        let (s1, _) = planner.plan(8, Multiplier::Single).unwrap();
        planner.release(s1);
        let (s2, e2) = planner.plan(8, Multiplier::Single).unwrap();
        assert_eq!((s2, e2), (0, 7));
    }

    #[test]
    fn rejects_range_exceeding_device_capacity() {
        let mut planner = FrameRangePlanner::new(4);
        assert!(planner.plan(8, Multiplier::Quad).is_err());
    }

    #[test]
    fn manual_reserve_detects_overlap() {
        let mut planner = FrameRangePlanner::new(32);
        planner.reserve(0, 7).unwrap();
        assert!(planner.reserve(4, 10).is_err());
        assert!(planner.reserve(8, 15).is_ok());
    }
}
