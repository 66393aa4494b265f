// SPDX-License-Identifier: Apache-2.0

//! The resource pool: segment registry plus the two-stage allocator
//! (spec.md §4.2, grounded on `allocateResourceFromResourcePoolIOBytes`
//! in `resourcepool.c`).

use crate::container::ContainerSet;
use crate::ratio::{MajorityRatioVote, RatioTracker};
use crate::segment::{Segment, SegmentId, SegmentRatioState};
use otap_df_rm_config::RmError;
use otap_df_rm_index::{NameIndex, OrderedIndex};
use std::collections::HashMap;

/// Inputs to a two-stage allocation (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    /// Target number of virtual segments to place.
    pub vseg_count: u32,
    /// Minimum acceptable if `vseg_count` cannot be fully satisfied.
    pub min_vseg: u32,
    /// Memory per virtual segment, megabytes.
    pub mem_mb: u64,
    /// Cores per virtual segment.
    pub core: f64,
    /// Total I/O bytes the caller expects to read; divided evenly across
    /// whatever `total_vseg` is finally granted.
    pub io_bytes: u64,
    /// Concurrent slices per virtual segment.
    pub slice: u32,
    /// Per-host cap on vsegs this request may place.
    pub vseg_limit_per_seg: u32,
    /// Cluster-wide cap on concurrent slices per host
    /// (`rm_slice_num_per_seg_limit`); ignored when `fix_node_count` is set.
    pub slice_limit_per_seg: u32,
    /// Preferred hosts, in decreasing scan-size order.
    pub preferred_hosts: Vec<String>,
    /// All-or-nothing: grant exactly `vseg_count` or roll back to zero.
    pub fix_node_count: bool,
    /// The memory/core ratio this request allocates against.
    pub ratio: u32,
}

/// One host's share of a granted allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedHost {
    /// The segment placed on.
    pub segment_id: SegmentId,
    /// Virtual segments placed on this host.
    pub vseg_count: u32,
    /// Index into the request's `preferred_hosts`, or
    /// `preferred_hosts.len()` if this placement wasn't a preferred-host match.
    pub preferred_index: u32,
}

/// A satisfied allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationResult {
    /// Per-host placement, in the order hosts were first touched.
    pub hosts: Vec<PlacedHost>,
    /// Total virtual segments granted.
    pub total_vseg: u32,
    /// I/O bytes assigned per virtual segment.
    pub vseg_io_bytes: u64,
}

/// Segment registry, per-ratio accounting, and the allocator. Global
/// cluster-wide tunables the allocator needs (slice limit) are passed in
/// per call rather than stored, since they can change via DDL/config
/// reload without re-registering segments.
#[derive(Debug, Default)]
pub struct ResourcePool {
    segments: HashMap<SegmentId, Segment>,
    next_segment_id: SegmentId,
    by_host_name: NameIndex<String, SegmentId>,
    ratio_trackers: HashMap<u32, RatioTracker>,
    container_sets: HashMap<(SegmentId, u32), ContainerSet>,
    io_workload_index: OrderedIndex<SegmentId>,
    avail_index: HashMap<u32, OrderedIndex<SegmentId>>,
    majority_vote: MajorityRatioVote,
}

impl ResourcePool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current majority memory/core ratio across registered segments,
    /// if any are registered.
    #[must_use]
    pub fn majority_ratio(&self) -> Option<u32> {
        self.majority_vote.candidate()
    }

    /// Looks a segment up by host name.
    #[must_use]
    pub fn segment_by_host(&self, host_name: &str) -> Option<&Segment> {
        self.by_host_name
            .get(host_name)
            .and_then(|id| self.segments.get(id))
    }

    /// Looks a segment up by internal id.
    #[must_use]
    pub fn segment_by_host_id(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(&id)
    }

    /// Number of accepted containers tracked for (segment, ratio).
    #[must_use]
    pub fn container_set_len(&self, segment_id: SegmentId, ratio: u32) -> usize {
        self.container_sets
            .get(&(segment_id, ratio))
            .map_or(0, |set| set.accepted.len())
    }

    /// Returns the ratio tracker for `ratio`, if any segment has reported it.
    #[must_use]
    pub fn ratio_tracker(&self, ratio: u32) -> Option<&RatioTracker> {
        self.ratio_trackers.get(&ratio)
    }

    /// Number of registered segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True if no segments are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Every registered segment's internal id, for callers that need to
    /// iterate the whole registry (e.g. a breathing pass over one ratio).
    #[must_use]
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.keys().copied().collect()
    }

    /// Every ratio with a cluster-wide tracker, i.e. every ratio at least
    /// one segment has reported.
    #[must_use]
    pub fn ratios(&self) -> Vec<u32> {
        self.ratio_trackers.keys().copied().collect()
    }

    /// Cluster-wide totals across usable segments, for percent-capacity
    /// refresh.
    #[must_use]
    pub fn cluster_totals(&self) -> (u64, f64) {
        self.segments
            .values()
            .filter(|s| s.usable)
            .fold((0u64, 0.0f64), |(mem, core), s| {
                (mem + s.total_memory_mb, core + s.total_core)
            })
    }

    /// Registers a heartbeat report for `host_name`, creating the segment
    /// if unseen, updating capacity otherwise, and casting this host's
    /// ratio into the cluster-wide majority vote (grounded on
    /// `addHAWQSegWithSegStat`).
    pub fn register_segment(
        &mut self,
        host_name: &str,
        total_memory_mb: u64,
        total_core: f64,
    ) -> SegmentId {
        let ratio = compute_ratio(total_memory_mb, total_core);

        if let Some(&id) = self.by_host_name.get(host_name) {
            let segment = self.segments.get_mut(&id).expect("indexed segment must exist");
            let old_memory = segment.total_memory_mb;
            let old_core = segment.total_core;
            segment.total_memory_mb = total_memory_mb;
            segment.total_core = total_core;
            segment.usable = true;

            if old_memory != total_memory_mb || (old_core - total_core).abs() > f64::EPSILON {
                let state = segment.ratio_state_mut(ratio);
                let delta_mem = total_memory_mb as i64 - old_memory as i64;
                let delta_core = total_core - old_core;
                state.available_memory_mb = (state.available_memory_mb as i64 + delta_mem).max(0) as u64;
                state.available_core = (state.available_core + delta_core).max(0.0);
                let tracker = self.ratio_trackers.entry(ratio).or_insert_with(|| RatioTracker::new(ratio));
                tracker.total_available_memory_mb =
                    (tracker.total_available_memory_mb as i64 + delta_mem).max(0) as u64;
                tracker.total_available_core = (tracker.total_available_core + delta_core).max(0.0);
            }
            self.majority_vote.cast(ratio);
            return id;
        }

        let id = self.next_segment_id;
        self.next_segment_id += 1;
        let mut segment = Segment::new(id, host_name.to_string(), total_memory_mb, total_core);
        segment.ratio_state_mut(ratio).available_memory_mb = total_memory_mb;
        segment.ratio_state_mut(ratio).available_core = total_core;

        self.by_host_name.insert(host_name.to_string(), id);
        self.io_workload_index.insert(id, 0);
        self.avail_index
            .entry(ratio)
            .or_default()
            .insert(id, total_memory_mb as i64);

        let tracker = self.ratio_trackers.entry(ratio).or_insert_with(|| RatioTracker::new(ratio));
        tracker.total_available_memory_mb += total_memory_mb;
        tracker.total_available_core += total_core;

        self.segments.insert(id, segment);
        self.majority_vote.cast(ratio);
        id
    }

    /// Marks a segment unusable, e.g. after a missed heartbeat window.
    pub fn mark_unusable(&mut self, id: SegmentId) {
        if let Some(segment) = self.segments.get_mut(&id) {
            segment.usable = false;
        }
    }

    /// The container set for (segment, ratio), creating an empty one if
    /// this is the first container ever tracked there.
    pub fn container_set_mut(&mut self, segment_id: SegmentId, ratio: u32) -> &mut ContainerSet {
        self.container_sets.entry((segment_id, ratio)).or_default()
    }

    /// The segment with the least available memory at `ratio`, used by
    /// the breathing pass to pick which segment's idle containers to
    /// return to the provider first.
    #[must_use]
    pub fn least_available_segment(&self, ratio: u32) -> Option<SegmentId> {
        self.avail_index.get(&ratio).and_then(OrderedIndex::leftmost)
    }

    /// Runs the two-stage allocation algorithm (spec.md §4.2).
    pub fn allocate(&mut self, req: &AllocationRequest) -> Result<AllocationResult, RmError> {
        let mut placed: HashMap<SegmentId, (u32, u32)> = HashMap::new(); // id -> (count, preferred_index)
        let mut placed_order: Vec<SegmentId> = Vec::new();
        let mut remaining = req.vseg_count;

        // Stage 1: locality.
        for (idx, host) in req.preferred_hosts.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            let Some(&segment_id) = self.by_host_name.get(host) else {
                continue;
            };
            if placed.contains_key(&segment_id) {
                continue;
            }
            if self.try_place_one(segment_id, req, false) {
                placed.insert(segment_id, (1, idx as u32));
                placed_order.push(segment_id);
                remaining -= 1;
            }
        }

        // Stage 2: round-robin over the IO-workload order, excluding
        // stage-1 hosts on the first pass, admitting them on the rebuild.
        let mut fruitless_passes = 0u32;
        let mut admit_stage1_hosts = false;
        while remaining > 0 && fruitless_passes < 3 {
            let mut drained = Vec::new();
            let mut progressed = false;

            while let Some((segment_id, key)) = self.io_workload_index.pop_leftmost() {
                drained.push((segment_id, key));
                if remaining == 0 {
                    break;
                }
                if !admit_stage1_hosts && placed.contains_key(&segment_id) {
                    continue;
                }
                if self.try_place_one(segment_id, req, req.fix_node_count) {
                    let entry = placed.entry(segment_id).or_insert_with(|| {
                        placed_order.push(segment_id);
                        (0, req.preferred_hosts.len() as u32)
                    });
                    entry.0 += 1;
                    remaining -= 1;
                    progressed = true;
                    let new_key = self.io_workload_key(segment_id);
                    drained.last_mut().expect("just pushed").1 = new_key;
                }
            }

            for (segment_id, key) in drained {
                self.io_workload_index.insert(segment_id, key);
            }

            if !progressed {
                fruitless_passes += 1;
                admit_stage1_hosts = true;
            } else {
                fruitless_passes = 0;
            }
        }

        let total_vseg = req.vseg_count - remaining;

        if req.fix_node_count && total_vseg != req.vseg_count {
            self.rollback(&placed, req);
            return Err(RmError::TooManyFixedSegnum);
        }

        if total_vseg < req.min_vseg {
            self.rollback(&placed, req);
            return Err(RmError::NoResource);
        }

        let vseg_io_bytes = if total_vseg > 0 {
            req.io_bytes / u64::from(total_vseg)
        } else {
            0
        };

        let hosts = placed_order
            .into_iter()
            .map(|id| {
                let (count, preferred_index) = placed[&id];
                PlacedHost {
                    segment_id: id,
                    vseg_count: count,
                    preferred_index,
                }
            })
            .collect();

        Ok(AllocationResult {
            hosts,
            total_vseg,
            vseg_io_bytes,
        })
    }

    /// Returns previously allocated resource to the pool (spec.md §4.2's
    /// mirror operation, grounded on `returnResourceToResourcePool`).
    pub fn release(&mut self, segment_id: SegmentId, ratio: u32, vseg_count: u32, mem_mb: u64, core: f64) {
        let total_mem = mem_mb * u64::from(vseg_count);
        let total_core = core * f64::from(vseg_count);

        if let Some(segment) = self.segments.get_mut(&segment_id) {
            let state = segment.ratio_state_mut(ratio);
            state.allocated_memory_mb = state.allocated_memory_mb.saturating_sub(total_mem);
            state.allocated_core = (state.allocated_core - total_core).max(0.0);
            state.available_memory_mb += total_mem;
            state.available_core += total_core;
            state.vseg_count = state.vseg_count.saturating_sub(vseg_count);
            segment.slice_workload = segment.slice_workload.saturating_sub(vseg_count);
        }
        if let Some(tracker) = self.ratio_trackers.get_mut(&ratio) {
            tracker.release(total_mem, total_core);
        }
        if let Some(index) = self.avail_index.get_mut(&ratio) {
            let new_key = self
                .segments
                .get(&segment_id)
                .and_then(|s| s.ratios.get(&ratio))
                .map_or(0, |r| r.available_memory_mb as i64);
            index.reorder(segment_id, new_key);
        }
    }

    fn io_workload_key(&self, segment_id: SegmentId) -> i64 {
        self.segments
            .get(&segment_id)
            .map_or(0, |s| i64::from(s.slice_workload))
    }

    /// `bypass_slice_check` lets the round-robin stage skip the
    /// `SliceWorkload` cap for `fix_node_count` requests; the locality
    /// stage always enforces it, even for `fix_node_count` requests
    /// (a preferred host already at its slice cap is still rejected).
    fn try_place_one(&mut self, segment_id: SegmentId, req: &AllocationRequest, bypass_slice_check: bool) -> bool {
        let segment = match self.segments.get_mut(&segment_id) {
            Some(s) if s.usable => s,
            _ => return false,
        };

        if !bypass_slice_check && segment.slice_workload + req.slice > req.slice_limit_per_seg {
            return false;
        }

        let state = segment.ratios.entry(req.ratio).or_default();
        if state.available_memory_mb < req.mem_mb || state.available_core < req.core {
            return false;
        }
        if state.vseg_count >= req.vseg_limit_per_seg {
            return false;
        }

        state.available_memory_mb -= req.mem_mb;
        state.available_core -= req.core;
        state.allocated_memory_mb += req.mem_mb;
        state.allocated_core += req.core;
        state.vseg_count += 1;
        segment.slice_workload += req.slice;

        if let Some(tracker) = self.ratio_trackers.get_mut(&req.ratio) {
            tracker.allocate(req.mem_mb, req.core);
        }
        if let Some(index) = self.avail_index.get_mut(&req.ratio) {
            let new_key = self
                .segments
                .get(&segment_id)
                .and_then(|s| s.ratios.get(&req.ratio))
                .map_or(0, |r| r.available_memory_mb as i64);
            index.reorder(segment_id, new_key);
        }
        true
    }

    fn rollback(&mut self, placed: &HashMap<SegmentId, (u32, u32)>, req: &AllocationRequest) {
        for (&segment_id, &(count, _)) in placed {
            self.release(segment_id, req.ratio, count, req.mem_mb, req.core);
        }
    }
}

/// Rounds a heartbeat-reported `(memory, core)` pair to an integer
/// memory/core ratio (megabytes per core), the key every segment and
/// container is ultimately bucketed by.
#[must_use]
pub fn compute_ratio(memory_mb: u64, core: f64) -> u32 {
    if core <= 0.0 {
        return 0;
    }
    (memory_mb as f64 / core).round() as u32
}

/// A segment's current ratio state, re-exported for callers outside this
/// crate that need read-only access without reaching into `Segment`.
pub type RatioState = SegmentRatioState;
