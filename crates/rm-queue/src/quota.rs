// SPDX-License-Identifier: Apache-2.0

//! Per-query quota computation (spec.md §4.3 `computeQueryQuota`).

use crate::tracker::QueueTracker;
use otap_df_rm_config::{AllocatePolicy, RmError};

/// The caller-supplied fixed vseg range for one acquire request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRange {
    /// `Gmin`.
    pub min: u32,
    /// `Gmax`.
    pub max: u32,
}

/// A resolved per-query vseg quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryQuota {
    /// `SegNumMin`.
    pub seg_num_min: u32,
    /// `SegNum`.
    pub seg_num: u32,
}

/// Computes the per-query vseg quota (spec.md §4.3). `avail_node_count`
/// is the number of currently usable segments; `vseg_limit_per_seg` and
/// `global_vseg_limit` come from the request.
pub fn compute_query_quota(
    tracker: &QueueTracker,
    requested: FixedRange,
    global_vseg_limit: u32,
    vseg_limit_per_seg: u32,
    avail_node_count: u32,
) -> Result<QueryQuota, RmError> {
    let (policy_seg_num, policy_seg_num_min) = match tracker.allocation_policy {
        AllocatePolicy::Even => {
            let seg_num = tracker.cluster_seg_number_max.min(global_vseg_limit);
            let seg_num_min = (tracker.cluster_seg_number / tracker.active_statements.max(1))
                .max(1)
                .min(seg_num);
            (seg_num, seg_num_min)
        }
        AllocatePolicy::Fifo => {
            let seg_num = tracker.cluster_seg_number_max.min(global_vseg_limit);
            (seg_num, tracker.cluster_seg_number)
        }
    };

    let r_max_l = vseg_limit_per_seg.saturating_mul(avail_node_count);
    let mut gmax = requested.max;
    if tracker.vseg_upper_limit >= requested.min {
        gmax = gmax.min(tracker.vseg_upper_limit);
    }

    let (seg_num_min, seg_num) = if requested.min == 1 {
        (
            gmax.min(policy_seg_num_min).min(r_max_l),
            gmax.min(r_max_l),
        )
    } else if requested.min == requested.max {
        if policy_seg_num < gmax {
            return Err(RmError::TooManyFixedSegnum);
        }
        (gmax, gmax)
    } else {
        let min = requested.min.max(policy_seg_num_min).min(gmax);
        let num = r_max_l.min(gmax).max(requested.min).min(policy_seg_num);
        (min, num)
    };

    if seg_num_min > seg_num {
        return Err(RmError::TooManyFixedSegnum);
    }

    Ok(QueryQuota { seg_num_min, seg_num })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::QueueTracker;

    fn tracker(policy: AllocatePolicy) -> QueueTracker {
        let mut t = QueueTracker::new(0, policy);
        t.cluster_seg_number = 40;
        t.cluster_seg_number_max = 48;
        t.active_statements = 20;
        t.vseg_upper_limit = 100;
        t
    }

    #[test]
    fn even_policy_minimum_is_cluster_over_active_statements() {
        let t = tracker(AllocatePolicy::Even);
        let quota =
            compute_query_quota(&t, FixedRange { min: 1, max: 100 }, 200, 8, 4).unwrap();
        assert_eq!(quota.seg_num, 32);
    }

    #[test]
    fn fixed_range_rejects_when_policy_cap_too_low() {
        let mut t = tracker(AllocatePolicy::Even);
        t.cluster_seg_number_max = 2;
        let err =
            compute_query_quota(&t, FixedRange { min: 4, max: 4 }, 200, 8, 10).unwrap_err();
        assert!(matches!(err, RmError::TooManyFixedSegnum));
    }

    #[test]
    fn otherwise_branch_pins_seg_num_to_r_max_l_when_it_is_tighter_than_gmax() {
        let t = tracker(AllocatePolicy::Even);
        // RmaxL = vseg_limit_per_seg * avail_node_count = 8 * 4 = 32, well under
        // both Gmax (50) and the policy cap (cluster_seg_number_max = 48); SegNum
        // must come out pinned to RmaxL, not to Gmax or the policy cap.
        let quota =
            compute_query_quota(&t, FixedRange { min: 2, max: 50 }, 200, 8, 4).unwrap();
        assert_eq!(quota.seg_num, 32);
    }

    #[test]
    fn vseg_upper_limit_clamps_gmax() {
        let mut t = tracker(AllocatePolicy::Even);
        t.vseg_upper_limit = 10;
        let quota =
            compute_query_quota(&t, FixedRange { min: 1, max: 100 }, 200, 100, 100).unwrap();
        assert!(quota.seg_num <= 10);
    }
}
