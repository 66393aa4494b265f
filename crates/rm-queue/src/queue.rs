// SPDX-License-Identifier: Apache-2.0

//! The resource queue type (spec.md §3 "Resource Queue").

use otap_df_rm_config::{AllocatePolicy, CoreQuantity, MemoryQuantity};

/// A queue's catalog oid.
pub type QueueOid = u32;

/// Structural role of a queue within the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// The implicit tree root; has no parent and holds no users.
    Root,
    /// `pg_default`, the fallback leaf for unassigned users.
    Default,
    /// A queue with no children; may hold users and run queries.
    Leaf,
    /// A queue with children; cannot have active connections.
    Branch,
}

/// Either a percent-of-cluster capacity expression or an absolute one;
/// a queue has exactly one, and a percent queue's memory and core
/// percentages must match (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CapacityExpr {
    /// Equal `(memory%, core%)`.
    Percent(u32),
    /// Absolute `(memory_mb, core)`.
    Absolute { memory_mb: u64, core: f64 },
}

impl CapacityExpr {
    /// Builds a capacity expression from the parsed DDL pair, enforcing
    /// that percent/absolute-ness and percent values match.
    pub fn from_quantities(
        memory: MemoryQuantity,
        core: CoreQuantity,
    ) -> Result<Self, otap_df_rm_config::RmError> {
        match (memory, core) {
            (MemoryQuantity::Percent(m), CoreQuantity::Percent(c)) if m == c => {
                Ok(CapacityExpr::Percent(m))
            }
            (MemoryQuantity::AbsoluteMb(mb), CoreQuantity::Absolute(c)) => {
                Ok(CapacityExpr::Absolute { memory_mb: mb, core: c })
            }
            _ => Err(otap_df_rm_config::RmError::InconsistentResourceExp {
                name: String::new(),
                reason: "memory and core limit expressions must both be the same kind and, \
                         if percentages, equal"
                    .to_string(),
            }),
        }
    }

    /// True if this is a percent expression.
    #[must_use]
    pub fn is_percent(&self) -> bool {
        matches!(self, CapacityExpr::Percent(_))
    }
}

/// Per-vseg resource quota, mutually exclusive memory or core form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegResourceQuota {
    /// Fixed memory per vseg, megabytes.
    MemoryMb(u64),
    /// Fixed cores per vseg.
    VCore(f64),
}

/// A named node in the resource queue tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceQueue {
    /// Catalog oid.
    pub oid: QueueOid,
    /// Parent's oid; `None` only for the root.
    pub parent_oid: Option<QueueOid>,
    /// The queue's name.
    pub name: String,
    /// Structural role.
    pub status: QueueStatus,
    /// Concurrent statement cap.
    pub active_statements: u32,
    /// Cluster capacity expression.
    pub capacity: CapacityExpr,
    /// Per-vseg resource quota.
    pub seg_resource_quota: SegResourceQuota,
    /// Multiplier applied to derive `ClusterMemoryMaxMB`/`ClusterVCoreMax`.
    pub resource_upper_factor: f64,
    /// Hard cap on vsegs a single request may hold.
    pub vseg_upper_limit: u32,
    /// Admission/dispatch discipline.
    pub allocation_policy: AllocatePolicy,
}

impl ResourceQueue {
    /// True if this queue may hold users and accept connections.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.status, QueueStatus::Leaf | QueueStatus::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_expr_rejects_mismatched_percent() {
        let err = CapacityExpr::from_quantities(
            MemoryQuantity::Percent(50),
            CoreQuantity::Percent(40),
        )
        .unwrap_err();
        assert!(matches!(err, otap_df_rm_config::RmError::InconsistentResourceExp { .. }));
    }

    #[test]
    fn capacity_expr_accepts_matching_percent() {
        let expr =
            CapacityExpr::from_quantities(MemoryQuantity::Percent(50), CoreQuantity::Percent(50))
                .unwrap();
        assert_eq!(expr, CapacityExpr::Percent(50));
    }
}
