// SPDX-License-Identifier: Apache-2.0

//! Returning idle provider-granted containers (spec.md §3 "breathing",
//! grounded on `timeoutIdleGRMResourceToRBByRatio` in `resourcepool.c`).
//! Only meaningful under `ProviderMode::YarnLibyarn`; under `None` every
//! container set stays empty and this is a no-op.

use crate::container::Container;
use crate::pool::ResourcePool;

/// Moves up to `max_return` idle containers at `ratio` into the
/// `ToKick` stage, skipping any segment that has `min_retain` or fewer
/// accepted containers (the water mark). Segments are considered
/// most-allocated first, matching the original's intent of choosing
/// the container to return from the machine holding the most resource,
/// rather than draining the idlest hosts.
///
/// Returns the containers moved, for the caller to notify the provider
/// about.
pub fn run_breathing_pass(
    pool: &mut ResourcePool,
    ratio: u32,
    segment_ids: &[crate::segment::SegmentId],
    max_return: u32,
    min_retain: u32,
) -> Vec<Container> {
    let mut candidates: Vec<_> = segment_ids
        .iter()
        .copied()
        .filter_map(|id| {
            let allocated = pool
                .segment_by_host_id(id)
                .and_then(|s| s.ratios.get(&ratio))
                .map(|r| r.allocated_memory_mb)?;
            let accepted = pool.container_set_len(id, ratio);
            if accepted > min_retain as usize {
                Some((id, allocated))
            } else {
                None
            }
        })
        .collect();

    // Most-allocated segment first.
    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    let mut returned = Vec::new();
    for (segment_id, _) in candidates {
        if returned.len() as u32 >= max_return {
            break;
        }
        let budget = max_return - returned.len() as u32;
        let set = pool.container_set_mut(segment_id, ratio);
        let retainable = min_retain as usize;
        let movable = set.accepted.len().saturating_sub(retainable).min(budget as usize);
        let moved: Vec<Container> = set.accepted.drain(..movable).collect();
        set.to_kick.extend(moved.iter().cloned());
        returned.extend(moved);
    }
    returned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ResourcePool;

    fn container(id: &str, segment_id: crate::segment::SegmentId) -> Container {
        Container {
            id: id.to_string(),
            segment_id,
            memory_mb: 1024,
            core: 1.0,
            ratio: 1024,
        }
    }

    #[test]
    fn breathing_respects_min_retain_and_max_return() {
        let mut pool = ResourcePool::new();
        pool.register_segment("h0", 16384, 16.0);
        let h0 = pool.segment_by_host("h0").unwrap().id;

        {
            let set = pool.container_set_mut(h0, 1024);
            for i in 0..5 {
                set.accepted.push(container(&format!("c{i}"), h0));
            }
        }

        let returned = run_breathing_pass(&mut pool, 1024, &[h0], 2, 2);
        assert_eq!(returned.len(), 2);
        let set = pool.container_set_mut(h0, 1024);
        assert_eq!(set.accepted.len(), 3);
        assert_eq!(set.to_kick.len(), 2);
    }

    #[test]
    fn breathing_drains_the_most_allocated_segment_first() {
        let mut pool = ResourcePool::new();
        pool.register_segment("h0", 16384, 16.0);
        pool.register_segment("h1", 16384, 16.0);
        let h0 = pool.segment_by_host("h0").unwrap().id;
        let h1 = pool.segment_by_host("h1").unwrap().id;

        let alloc_request = |host: &str| crate::pool::AllocationRequest {
            vseg_count: 1,
            min_vseg: 1,
            mem_mb: 1024,
            core: 1.0,
            io_bytes: 0,
            slice: 1,
            vseg_limit_per_seg: 64,
            slice_limit_per_seg: 64,
            preferred_hosts: vec![host.to_string()],
            fix_node_count: false,
            ratio: 1024,
        };

        // h0 ends up with more allocated memory (4 vsegs) than h1 (1 vseg),
        // so h0 has *less* available memory than h1 despite being busier.
        for _ in 0..4 {
            pool.allocate(&alloc_request("h0")).unwrap();
        }
        pool.allocate(&alloc_request("h1")).unwrap();

        for (segment_id, label) in [(h0, "h0"), (h1, "h1")] {
            let set = pool.container_set_mut(segment_id, 1024);
            for i in 0..3 {
                set.accepted.push(container(&format!("{label}-c{i}"), segment_id));
            }
        }

        let returned = run_breathing_pass(&mut pool, 1024, &[h0, h1], 3, 0);
        assert_eq!(returned.len(), 3);
        assert!(
            returned.iter().all(|c| c.segment_id == h0),
            "the busier segment (h0) should be drained before the idler one (h1)"
        );
    }

    #[test]
    fn breathing_skips_segments_at_or_below_water_mark() {
        let mut pool = ResourcePool::new();
        pool.register_segment("h0", 16384, 16.0);
        let h0 = pool.segment_by_host("h0").unwrap().id;
        {
            let set = pool.container_set_mut(h0, 1024);
            set.accepted.push(container("c0", h0));
        }
        let returned = run_breathing_pass(&mut pool, 1024, &[h0], 5, 2);
        assert!(returned.is_empty());
    }
}
