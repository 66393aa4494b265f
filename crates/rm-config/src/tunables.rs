// SPDX-License-Identifier: Apache-2.0

//! Process-wide tunables (spec.md §6 "Tunables" table).

use crate::policy::{AllocatePolicy, ProviderMode};
use serde::{Deserialize, Serialize};

/// Process-wide tunables, deserializable from the top-level config file.
///
/// Field defaults follow the conventional HAWQ resource manager defaults;
/// every field can be overridden in the config file or via CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Tunables {
    /// Maximum number of resource queues the cluster may define.
    pub rm_max_resource_queue_number: u32,

    /// Seconds a connection may remain unchanged in
    /// `REGISTER_DONE`/`ALLOC_WAIT`/`ALLOC_DONE` before it is force-closed.
    pub rm_resource_noaction_timeout_seconds: u64,

    /// Seconds a head-of-queue request may wait for resource (with the
    /// ratio tracker showing non-zero pending the whole time) before it
    /// is cancelled with `NoResourceTimeout`.
    pub rm_query_resource_noresource_timeout_seconds: u64,

    /// Seconds a water-mark entry is retained before ageing out.
    pub rm_resource_timeout_seconds: u64,

    /// If true, a request that cannot be dispatched is requeued at the
    /// head of its queue's FIFO and the inner dispatch loop breaks,
    /// instead of requeueing at the tail.
    pub rm_force_fifo_queue: bool,

    /// Maximum concurrent slices a single segment may host across all
    /// vsegs assigned to it.
    pub rm_slice_num_per_seg_limit: u32,

    /// Percentage of idle allocated resource the breathing pass targets
    /// returning to the provider per pass.
    pub rm_grm_breath_return_percentage: u32,

    /// Default minimum number of containers a segment retains during
    /// breathing when no water mark has been recorded yet.
    pub rm_seg_container_default_waterlevel: u32,

    /// Cluster-wide default allocation policy for queues that do not
    /// specify one explicitly.
    pub rm_allocation_policy: AllocatePolicy,

    /// Resource provider mode.
    pub rm_provider_mode: ProviderMode,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            rm_max_resource_queue_number: 512,
            rm_resource_noaction_timeout_seconds: 600,
            rm_query_resource_noresource_timeout_seconds: 600,
            rm_resource_timeout_seconds: 180,
            rm_force_fifo_queue: false,
            rm_slice_num_per_seg_limit: 1,
            rm_grm_breath_return_percentage: 50,
            rm_seg_container_default_waterlevel: 0,
            rm_allocation_policy: AllocatePolicy::Even,
            rm_provider_mode: ProviderMode::None,
        }
    }
}

impl Tunables {
    /// Returns validation errors for this tunable set.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.rm_max_resource_queue_number == 0 {
            errors.push(format!(
                "{path_prefix}.rm_max_resource_queue_number must be greater than 0"
            ));
        }
        if self.rm_slice_num_per_seg_limit == 0 {
            errors.push(format!(
                "{path_prefix}.rm_slice_num_per_seg_limit must be greater than 0"
            ));
        }
        if self.rm_grm_breath_return_percentage > 100 {
            errors.push(format!(
                "{path_prefix}.rm_grm_breath_return_percentage must be <= 100"
            ));
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_values() {
        let tunables = Tunables::default();
        assert_eq!(tunables.rm_max_resource_queue_number, 512);
        assert_eq!(tunables.rm_allocation_policy, AllocatePolicy::Even);
        assert_eq!(tunables.rm_provider_mode, ProviderMode::None);
        assert!(tunables.validation_errors("tunables").is_empty());
    }

    #[test]
    fn validates_out_of_range_fields() {
        let mut tunables = Tunables::default();
        tunables.rm_max_resource_queue_number = 0;
        tunables.rm_slice_num_per_seg_limit = 0;
        tunables.rm_grm_breath_return_percentage = 101;
        let errors = tunables.validation_errors("tunables");
        assert_eq!(errors.len(), 3);
    }
}
