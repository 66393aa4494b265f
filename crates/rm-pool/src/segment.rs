// SPDX-License-Identifier: Apache-2.0

//! Segment registry entries (spec.md §3 "Segment"; grounded on
//! `SegResource`/`SegStat` in `resourcepool.c`).

use std::collections::HashMap;

/// Dense, monotonically assigned internal segment identifier. Stable for
/// the lifetime of the process; never reused even if a host is dropped.
pub type SegmentId = u32;

/// A registered cluster host and its currently known capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Internal dense id.
    pub id: SegmentId,
    /// The heartbeat-reported host name, used for DNS-free lookups.
    pub host_name: String,
    /// All IP addresses this host has reported, used as a fallback lookup
    /// key when the host name itself does not match (see
    /// `getSegIDByHostAddr` in the original: a host's first address, not
    /// its name, can change across restarts).
    pub host_addrs: Vec<String>,
    /// The host's total memory as last reported by heartbeat, megabytes.
    pub total_memory_mb: u64,
    /// The host's total cores as last reported by heartbeat.
    pub total_core: f64,
    /// True while the host has been reachable within the heartbeat
    /// timeout window; flips `false` on missed heartbeats.
    pub usable: bool,
    /// Concurrent slice count currently running across all vsegs placed
    /// on this host, compared against `rm_slice_num_per_seg_limit`.
    pub slice_workload: u32,
    /// Per-ratio availability and allocation accounting.
    pub ratios: HashMap<u32, SegmentRatioState>,
    /// Minimum number of idle containers to retain per ratio during
    /// breathing, once a water mark has been observed for that ratio.
    pub water_marks: HashMap<u32, u32>,
}

/// A segment's per-ratio resource accounting. One exists per
/// (segment, memory/core ratio) pair that has ever held a container or
/// served an allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegmentRatioState {
    /// Memory not currently allocated to any request, megabytes.
    pub available_memory_mb: u64,
    /// Cores not currently allocated to any request.
    pub available_core: f64,
    /// Memory currently allocated to in-flight requests, megabytes.
    pub allocated_memory_mb: u64,
    /// Cores currently allocated to in-flight requests.
    pub allocated_core: f64,
    /// Number of virtual segments currently placed on this host at this
    /// ratio, used against `vseg_limit_per_seg`.
    pub vseg_count: u32,
}

impl Segment {
    /// Creates a freshly registered segment with no ratio state yet.
    #[must_use]
    pub fn new(id: SegmentId, host_name: String, total_memory_mb: u64, total_core: f64) -> Self {
        Self {
            id,
            host_name,
            host_addrs: Vec::new(),
            total_memory_mb,
            total_core,
            usable: true,
            slice_workload: 0,
            ratios: HashMap::new(),
            water_marks: HashMap::new(),
        }
    }

    /// Returns the ratio state for `ratio`, creating an empty one if this
    /// is the first time the segment has seen it.
    pub fn ratio_state_mut(&mut self, ratio: u32) -> &mut SegmentRatioState {
        self.ratios.entry(ratio).or_default()
    }

    /// Total memory considered by the scheduler: available plus allocated,
    /// summed across every ratio this segment currently tracks.
    #[must_use]
    pub fn tracked_memory_mb(&self) -> u64 {
        self.ratios
            .values()
            .map(|r| r.available_memory_mb + r.allocated_memory_mb)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_segment_has_no_ratio_state() {
        let seg = Segment::new(0, "h1".to_string(), 16384, 16.0);
        assert!(seg.ratios.is_empty());
        assert_eq!(seg.tracked_memory_mb(), 0);
    }

    #[test]
    fn ratio_state_mut_creates_on_first_access() {
        let mut seg = Segment::new(0, "h1".to_string(), 16384, 16.0);
        seg.ratio_state_mut(1024).available_memory_mb = 16384;
        assert_eq!(seg.tracked_memory_mb(), 16384);
    }
}
