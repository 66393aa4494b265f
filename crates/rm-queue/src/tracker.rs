// SPDX-License-Identifier: Apache-2.0

//! Per-queue runtime dispatch accounting (spec.md §4.3, grounded on the
//! `QueueTrack`/`DynResourceQueueTrack` bookkeeping in
//! `resqueuemanager.c`).

use otap_df_rm_config::AllocatePolicy;
use otap_df_rm_proto::AcquireResourceRequest;
use std::collections::VecDeque;

/// A single in-flight acquire request sitting in a queue's FIFO.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    /// The original request, carried for the pool allocator call.
    pub request: AcquireResourceRequest,
    /// True once a dispatch attempt failed due to per-host fragmentation
    /// rather than aggregate scarcity; such requests are serviced first.
    pub troubled_by_fragment: bool,
    /// Seconds since this request reached the head of its queue, reset
    /// whenever it is not at the head. Used by the timeout sweeper.
    pub head_of_queue_seconds: u64,
}

/// Runtime dispatch state for one leaf queue, refreshed every control
/// loop tick from [`crate::tree::refresh_percentage_capacity`] and
/// mutated by the dispatch pass.
#[derive(Debug, Clone)]
pub struct QueueTracker {
    /// The queue this tracker belongs to.
    pub queue_oid: u32,
    /// Admission/dispatch discipline, mirrored from the queue for
    /// quota computation convenience.
    pub allocation_policy: AllocatePolicy,
    /// The memory/core ratio this queue's containers allocate against,
    /// derived from its `SegResourceQuota` and the pool's majority ratio.
    /// Trackers sharing a ratio compete for that ratio's pool capacity
    /// in the same dispatch-pass redistribution round.
    pub ratio: u32,
    /// Concurrent statement cap, mirrored from the queue.
    pub active_statements: u32,
    /// Hard per-request vseg cap, mirrored from the queue.
    pub vseg_upper_limit: u32,
    /// Derived operating memory capacity, megabytes.
    pub cluster_memory_mb: u64,
    /// Derived operating memory capacity ceiling, megabytes.
    pub cluster_memory_max_mb: u64,
    /// Derived operating vseg count.
    pub cluster_seg_number: u32,
    /// Derived operating vseg count ceiling.
    pub cluster_seg_number_max: u32,
    /// Memory currently allocated to running queries, megabytes.
    pub total_allocated_mb: u64,
    /// Memory currently in active use (subset of allocated that's been
    /// reported used by a running query), megabytes.
    pub total_used_mb: u64,
    /// Number of queries currently dispatched and running.
    pub num_running_queries: u32,
    /// Requests waiting to be dispatched, strictly FIFO at enqueue.
    pub pending: VecDeque<PendingRequest>,
    /// Round-robin cursor for remainder distribution across queues
    /// sharing a ratio tracker; owned by the ratio tracker in practice,
    /// mirrored here for queues that track their own turn.
    pub expect_more_resource: bool,
}

impl QueueTracker {
    /// Creates a tracker with zeroed capacity; callers refresh capacity
    /// before the first dispatch pass.
    #[must_use]
    pub fn new(queue_oid: u32, allocation_policy: AllocatePolicy) -> Self {
        Self {
            queue_oid,
            allocation_policy,
            ratio: 0,
            active_statements: 20,
            vseg_upper_limit: u32::MAX,
            cluster_memory_mb: 0,
            cluster_memory_max_mb: 0,
            cluster_seg_number: 0,
            cluster_seg_number_max: 0,
            total_allocated_mb: 0,
            total_used_mb: 0,
            num_running_queries: 0,
            pending: VecDeque::new(),
            expect_more_resource: false,
        }
    }

    /// True if the concurrency gate (`ActiveStatements`) allows one more
    /// dispatch right now.
    #[must_use]
    pub fn has_concurrency_slot(&self) -> bool {
        self.num_running_queries < self.active_statements
    }

    /// Enqueues a request at the tail, the only legal enqueue position.
    pub fn enqueue(&mut self, request: AcquireResourceRequest) {
        self.pending.push_back(PendingRequest {
            request,
            troubled_by_fragment: false,
            head_of_queue_seconds: 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(conn_id: u64) -> AcquireResourceRequest {
        AcquireResourceRequest {
            conn_id,
            session_id: 1,
            max_seg_count_fix: None,
            min_seg_count_fix: None,
            vseg_limit: 100,
            vseg_limit_per_seg: 8,
            seg_mem_mb: 1024,
            seg_core: 1.0,
            slice_size: 1,
            io_bytes: 0,
            preferred_hosts: Vec::new(),
            preferred_scan_sizes: Vec::new(),
        }
    }

    #[test]
    fn enqueue_is_strictly_fifo() {
        let mut tracker = QueueTracker::new(3, AllocatePolicy::Even);
        tracker.enqueue(sample_request(1));
        tracker.enqueue(sample_request(2));
        assert_eq!(tracker.pending.front().unwrap().request.conn_id, 1);
        assert_eq!(tracker.pending.back().unwrap().request.conn_id, 2);
    }

    #[test]
    fn concurrency_slot_respects_active_statements() {
        let mut tracker = QueueTracker::new(3, AllocatePolicy::Even);
        tracker.active_statements = 1;
        assert!(tracker.has_concurrency_slot());
        tracker.num_running_queries = 1;
        assert!(!tracker.has_concurrency_slot());
    }
}
