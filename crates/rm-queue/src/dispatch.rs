// SPDX-License-Identifier: Apache-2.0

//! One dispatch pass: weighted redistribution across the queues sharing
//! a ratio, then per-queue FIFO draining against the pool allocator
//! (spec.md §4.3 `dispatchResourceToQueries`).

use crate::tracker::{PendingRequest, QueueTracker};
use otap_df_rm_config::RmError;
use otap_df_rm_pool::{AllocationRequest, ResourcePool};
use std::collections::HashMap;

/// One queue's standing relative to its weighted target this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStanding {
    /// `TotalUsed` already exceeds the weighted target; pinned, excluded
    /// from redistribution.
    OverUsing,
    /// Below target; eligible to receive newly available memory.
    UnderTarget,
}

/// Classifies every queue sharing a ratio into over-using or
/// under-target, given each queue's weighted target share of
/// `ratio_total_memory_mb`.
#[must_use]
pub fn classify_queues(
    trackers: &HashMap<u32, QueueTracker>,
    ratio_total_memory_mb: u64,
) -> HashMap<u32, QueueStanding> {
    let total_weight: u64 = trackers.values().map(|t| t.cluster_memory_mb).sum();
    trackers
        .iter()
        .map(|(&oid, tracker)| {
            let target = if total_weight == 0 {
                0
            } else {
                (ratio_total_memory_mb as u128 * tracker.cluster_memory_mb as u128 / total_weight as u128) as u64
            };
            let standing = if tracker.total_used_mb > target {
                QueueStanding::OverUsing
            } else {
                QueueStanding::UnderTarget
            };
            (oid, standing)
        })
        .collect()
}

/// Reassigns `available_memory_mb` proportionally across under-target
/// queues by `ClusterMemoryMB` weight. A queue whose outstanding
/// pending request would be fully satisfied before reaching its
/// weighted share gets exactly what it asks; otherwise it gets its
/// weighted share and is flagged `expect_more_resource`.
///
/// Returns the memory actually handed to each queue and the unspent
/// remainder.
pub fn redistribute_proportional(
    trackers: &mut HashMap<u32, QueueTracker>,
    standings: &HashMap<u32, QueueStanding>,
    available_memory_mb: u64,
) -> (HashMap<u32, u64>, u64) {
    let under_target: Vec<u32> = standings
        .iter()
        .filter(|(_, s)| **s == QueueStanding::UnderTarget)
        .map(|(&oid, _)| oid)
        .collect();

    let total_weight: u64 = under_target
        .iter()
        .filter_map(|oid| trackers.get(oid))
        .map(|t| t.cluster_memory_mb)
        .sum();

    let mut given = HashMap::new();
    let mut spent = 0u64;

    for oid in &under_target {
        let Some(tracker) = trackers.get_mut(oid) else { continue };
        let weighted_share = if total_weight == 0 {
            0
        } else {
            (available_memory_mb as u128 * tracker.cluster_memory_mb as u128 / total_weight as u128) as u64
        };

        let requested_mb: u64 = tracker
            .pending
            .iter()
            .map(|p| u64::from(p.request.seg_mem_mb) * u64::from(p.request.vseg_limit))
            .sum();

        let share = if requested_mb <= weighted_share {
            tracker.expect_more_resource = false;
            requested_mb
        } else {
            tracker.expect_more_resource = true;
            weighted_share
        };

        tracker.total_allocated_mb += share;
        given.insert(*oid, share);
        spent += share;
    }

    (given, available_memory_mb.saturating_sub(spent))
}

/// Distributes any post-proportional remainder to a single
/// `expect_more_resource` queue per call, up to its `ClusterMemoryMaxMB`
/// ceiling, advancing `cursor` round-robin across `ordered_oids`.
/// Returns the oid credited, if any, and how much.
pub fn distribute_remainder(
    trackers: &mut HashMap<u32, QueueTracker>,
    ordered_oids: &[u32],
    cursor: &mut usize,
    remainder: u64,
) -> Option<(u32, u64)> {
    if ordered_oids.is_empty() || remainder == 0 {
        return None;
    }
    for step in 0..ordered_oids.len() {
        let idx = (*cursor + step) % ordered_oids.len();
        let oid = ordered_oids[idx];
        if let Some(tracker) = trackers.get_mut(&oid) {
            if tracker.expect_more_resource && tracker.total_allocated_mb < tracker.cluster_memory_max_mb {
                let room = tracker.cluster_memory_max_mb - tracker.total_allocated_mb;
                let credit = room.min(remainder);
                tracker.total_allocated_mb += credit;
                *cursor = (idx + 1) % ordered_oids.len();
                return Some((oid, credit));
            }
        }
    }
    None
}

/// Outcome of attempting to dispatch one request from a queue's FIFO head.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The allocator granted the request.
    Granted(otap_df_rm_pool::AllocationResult),
    /// The allocator could not place it; the caller decides requeue policy.
    Failed(RmError),
}

/// Drains one queue's FIFO against the pool allocator for this tick,
/// processing fragment-troubled requests first (spec.md §4.3 step 4).
/// `force_fifo`: on failure, requeue at head and stop this queue's pass
/// instead of requeueing at tail and continuing.
pub fn dispatch_queue(
    tracker: &mut QueueTracker,
    pool: &mut ResourcePool,
    ratio: u32,
    vseg_limit_per_seg_cluster: u32,
    slice_limit_per_seg: u32,
    force_fifo: bool,
) -> Vec<(u64, DispatchOutcome)> {
    let mut results = Vec::new();

    // Stable-partition: fragment-troubled requests move to the front of
    // processing order without disturbing FIFO among their own kind or
    // among the untroubled remainder.
    let mut drained: Vec<Option<PendingRequest>> =
        tracker.pending.drain(..).map(Some).collect();
    let mut order: Vec<usize> = (0..drained.len()).collect();
    order.sort_by_key(|&i| !drained[i].as_ref().unwrap().troubled_by_fragment);

    let mut requeue_tail = Vec::new();
    let mut requeue_head = None;

    for i in order {
        if !tracker.has_concurrency_slot() {
            break;
        }
        let pending = drained[i].take().unwrap();
        let req = AllocationRequest {
            vseg_count: pending.request.vseg_limit,
            min_vseg: pending.request.min_seg_count_fix.unwrap_or(1),
            mem_mb: u64::from(pending.request.seg_mem_mb),
            core: pending.request.seg_core,
            io_bytes: pending.request.io_bytes,
            slice: pending.request.slice_size,
            vseg_limit_per_seg: pending.request.vseg_limit_per_seg.min(vseg_limit_per_seg_cluster),
            slice_limit_per_seg,
            preferred_hosts: pending.request.preferred_hosts.clone(),
            fix_node_count: pending.request.min_seg_count_fix.is_some()
                && pending.request.min_seg_count_fix == pending.request.max_seg_count_fix,
            ratio,
        };
        let conn_id = pending.request.conn_id;

        match pool.allocate(&req) {
            Ok(result) => {
                tracker.total_used_mb += result.total_vseg as u64 * u64::from(pending.request.seg_mem_mb);
                tracker.num_running_queries += 1;
                results.push((conn_id, DispatchOutcome::Granted(result)));
            }
            Err(e) => {
                let mut troubled = pending;
                troubled.troubled_by_fragment = true;
                results.push((conn_id, DispatchOutcome::Failed(e)));
                if force_fifo {
                    requeue_head = Some(troubled);
                    break;
                }
                requeue_tail.push(troubled);
            }
        }
    }

    // Untouched requests (concurrency gate closed, or skipped after a
    // force-fifo break) keep their original relative FIFO order.
    let mut rebuilt: std::collections::VecDeque<PendingRequest> =
        drained.into_iter().flatten().collect();
    if let Some(head) = requeue_head {
        rebuilt.push_front(head);
    }
    rebuilt.extend(requeue_tail);
    tracker.pending = rebuilt;

    results
}
