// SPDX-License-Identifier: Apache-2.0

//! RPC message bodies (spec.md §6 "External Interfaces"). Wire framing
//! (length prefixes, NUL-terminated strings, byte alignment) is out of
//! scope here: these are the decoded, typed payload shapes a transport
//! layer hands to and receives from the core.

use serde::{Deserialize, Serialize};

/// A connection identifier, stable for the lifetime of a client session.
pub type ConnId = u64;

/// `REQUEST_QD_REGISTER`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// The connection registering.
    pub conn_id: ConnId,
    /// The catalog user name to bind this connection to.
    pub user_name: String,
}

/// `REQUEST_QD_ACQUIRE_RESOURCE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquireResourceRequest {
    /// The requesting connection.
    pub conn_id: ConnId,
    /// Groups requests from the same client session for deadlock detection.
    pub session_id: u64,
    /// Upper bound on virtual segment count, when fixed.
    pub max_seg_count_fix: Option<u32>,
    /// Lower bound on virtual segment count, when fixed.
    pub min_seg_count_fix: Option<u32>,
    /// Cluster-wide cap on vsegs this request may hold concurrently.
    pub vseg_limit: u32,
    /// Per-host cap on vsegs this request may place.
    pub vseg_limit_per_seg: u32,
    /// Requested memory per virtual segment, in megabytes.
    pub seg_mem_mb: u32,
    /// Requested cores per virtual segment.
    pub seg_core: f64,
    /// Concurrent slices this request will run per segment.
    pub slice_size: u32,
    /// Total I/O bytes the request expects to read, for workload-weighted placement.
    pub io_bytes: u64,
    /// Preferred hosts, in decreasing scan-size order.
    pub preferred_hosts: Vec<String>,
    /// Scan size in bytes for each entry in `preferred_hosts`, same order.
    pub preferred_scan_sizes: Vec<u64>,
}

/// One element of a satisfied [`AcquireResourceRequest`]: the segment
/// placed on, how many vsegs landed there, and which preferred-host index
/// (if any) it corresponds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatedHost {
    /// The segment's registered host name.
    pub host: String,
    /// Number of virtual segments placed on this host.
    pub vseg_count: u32,
    /// Index into the original `preferred_hosts` list, or `preferred_hosts.len()`
    /// if this placement did not come from the preferred list.
    pub preferred_index: u32,
}

/// Outcome of an acquire-resource request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AcquireResult {
    /// The request was fully satisfied.
    Granted {
        /// Per-host placement.
        hosts: Vec<AllocatedHost>,
        /// Memory granted per virtual segment, in megabytes.
        seg_mem_mb: u32,
        /// Cores granted per virtual segment.
        seg_core: f64,
        /// I/O bytes assigned per virtual segment (`io_bytes / total_vseg`).
        vseg_io_bytes: u64,
    },
    /// The request is queued and waiting; no placement yet.
    Queued,
    /// The request was rejected or cancelled; see the carried error.
    Failed(otap_df_rm_config::RmError),
}

/// `RESPONSE_QD_ACQUIRE_RESOURCE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquireResourceResponse {
    /// The connection this response answers.
    pub conn_id: ConnId,
    /// The outcome.
    pub result: AcquireResult,
}

/// `REQUEST_QD_RETURN_RESOURCE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnResourceRequest {
    /// The connection returning its held resource.
    pub conn_id: ConnId,
}

/// The three DDL verbs `REQUEST_QD_DDL_MANIPULATERESQUEUE` carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueDdlAction {
    /// `CREATE RESOURCE QUEUE`.
    Create,
    /// `ALTER RESOURCE QUEUE`.
    Alter,
    /// `DROP RESOURCE QUEUE`.
    Drop,
}

/// `REQUEST_QD_DDL_MANIPULATERESQUEUE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDdlRequest {
    /// The connection issuing the DDL.
    pub conn_id: ConnId,
    /// Which verb.
    pub action: QueueDdlAction,
    /// The queue name.
    pub name: String,
    /// Raw `(key, val)` attribute pairs; `CREATE`/`ALTER` only.
    pub attrs: Vec<(String, String)>,
}

/// The two verbs `REQUEST_QD_DDL_MANIPULATEROLE` carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleDdlAction {
    /// Bind or rebind a role to a resource queue.
    SetQueue,
    /// Remove a role's resource queue binding.
    UnsetQueue,
}

/// `REQUEST_QD_DDL_MANIPULATEROLE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDdlRequest {
    /// Which verb.
    pub action: RoleDdlAction,
    /// The role's catalog oid.
    pub role_oid: u32,
    /// The target resource queue's catalog oid.
    pub queue_oid: u32,
    /// Whether the role is a cluster superuser (superusers bypass admission).
    pub is_superuser: bool,
    /// The role's name, for logging.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_result_serializes_through_json() {
        let granted = AcquireResult::Granted {
            hosts: vec![AllocatedHost {
                host: "h1".to_string(),
                vseg_count: 2,
                preferred_index: 0,
            }],
            seg_mem_mb: 1024,
            seg_core: 1.0,
            vseg_io_bytes: 512,
        };
        let json = serde_json::to_string(&granted).unwrap();
        let back: AcquireResult = serde_json::from_str(&json).unwrap();
        assert_eq!(granted, back);
    }
}
