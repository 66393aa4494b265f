// SPDX-License-Identifier: Apache-2.0

//! Property test for the pool's core conservation invariant: memory
//! allocated as seen per-segment always equals what the ratio-wide
//! tracker believes it handed out, no matter the allocate/release order.

use otap_df_rm_pool::{AllocationRequest, ResourcePool};
use proptest::prelude::*;

const RATIO: u32 = 1024;
const HOST_MEMORY_MB: u64 = 32_768;

fn fresh_pool() -> ResourcePool {
    let mut pool = ResourcePool::new();
    pool.register_segment("h0", HOST_MEMORY_MB, 32.0);
    pool
}

fn request(vseg_count: u32) -> AllocationRequest {
    AllocationRequest {
        vseg_count,
        min_vseg: 1,
        mem_mb: 1024,
        core: 1.0,
        io_bytes: 0,
        slice: 1,
        vseg_limit_per_seg: 64,
        slice_limit_per_seg: 64,
        preferred_hosts: Vec::new(),
        fix_node_count: false,
        ratio: RATIO,
    }
}

fn assert_conserved(pool: &ResourcePool) {
    let tracker = pool.ratio_tracker(RATIO).unwrap();

    let segment_allocated: u64 = pool
        .segment_ids()
        .iter()
        .filter_map(|&id| pool.segment_by_host_id(id))
        .filter_map(|s| s.ratios.get(&RATIO))
        .map(|r| r.allocated_memory_mb)
        .sum();
    assert_eq!(
        segment_allocated, tracker.total_allocated_memory_mb,
        "segment-level allocated memory drifted from the ratio tracker's total"
    );

    let segment_total: u64 = pool
        .segment_ids()
        .iter()
        .filter_map(|&id| pool.segment_by_host_id(id))
        .filter_map(|s| s.ratios.get(&RATIO))
        .map(|r| r.available_memory_mb + r.allocated_memory_mb)
        .sum();
    assert_eq!(segment_total, HOST_MEMORY_MB, "no memory should ever appear or vanish");
}

proptest! {
    /// Applies a random sequence of allocate/release actions and checks the
    /// conservation invariant after each one, then again once everything
    /// outstanding has been released.
    #[test]
    fn allocate_release_sequence_keeps_ratio_accounting_conserved(ops in prop::collection::vec(1u32..=4, 1..40)) {
        let mut pool = fresh_pool();
        let mut held: Vec<(u32, u32)> = Vec::new();

        for op in ops {
            if op <= 2 || held.is_empty() {
                if let Ok(result) = pool.allocate(&request(op)) {
                    for host in &result.hosts {
                        held.push((host.segment_id, host.vseg_count));
                    }
                }
            } else if let Some((segment_id, vseg_count)) = held.pop() {
                pool.release(segment_id, RATIO, vseg_count, 1024, 1.0);
            }
            assert_conserved(&pool);
        }

        for (segment_id, vseg_count) in held {
            pool.release(segment_id, RATIO, vseg_count, 1024, 1.0);
        }
        assert_conserved(&pool);
    }
}
