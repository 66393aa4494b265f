// SPDX-License-Identifier: Apache-2.0

//! Per-connection bookkeeping for a granted allocation, so a later
//! `REQUEST_QD_RETURN_RESOURCE` can hand the exact placement back to the
//! pool and ratio/deadlock trackers.

use otap_df_rm_pool::PlacedHost;

/// What one connection currently holds, recorded at grant time and
/// consumed (then removed) at return time.
#[derive(Debug, Clone)]
pub struct GrantedResource {
    pub queue_oid: u32,
    pub session_id: u64,
    pub ratio: u32,
    pub mem_mb: u64,
    pub core: f64,
    pub hosts: Vec<PlacedHost>,
}

impl GrantedResource {
    /// Total memory held across every placed host.
    #[must_use]
    pub fn total_memory_mb(&self) -> u64 {
        self.hosts.iter().map(|h| u64::from(h.vseg_count) * self.mem_mb).sum()
    }

    /// Total cores held across every placed host.
    #[must_use]
    pub fn total_core(&self) -> f64 {
        self.hosts.iter().map(|h| f64::from(h.vseg_count) * self.core).sum()
    }
}
