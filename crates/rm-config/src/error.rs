// SPDX-License-Identifier: Apache-2.0

//! The flat, numeric-taxonomy error type exposed to RPC clients.
//!
//! Internal layers (index, pool, queue) use their own focused error types;
//! they are converted into [`RmError`] only at the RPC boundary, never
//! propagated across the control loop as `RmError` themselves. Internal
//! invariant violations surface as [`RmError::Invariant`], which the
//! control loop treats as fatal rather than something to recover from.

use std::fmt;

/// All client-visible and internal-fatal error conditions the core can
/// report, matching the flat numeric taxonomy of the resource queue
/// manager.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RmError {
    /// Registration lookup failed: no such user.
    #[error("no such user `{user}`")]
    NoUserId {
        /// The user name that failed to resolve.
        user: String,
    },

    /// Registration lookup failed: user has no assigned queue.
    #[error("user `{user}` has no assigned resource queue")]
    NoAssignedQueue {
        /// The user name with no bound queue.
        user: String,
    },

    /// DDL: queue name not found.
    #[error("no such resource queue `{name}`")]
    NoQueueName {
        /// The queue name that failed to resolve.
        name: String,
    },

    /// DDL: queue name already exists.
    #[error("resource queue `{name}` already exists")]
    DuplicateQueueName {
        /// The duplicate queue name.
        name: String,
    },

    /// DDL: queue oid collision (internal).
    #[error("resource queue oid `{oid}` already exists")]
    DuplicateQueueId {
        /// The duplicate queue oid.
        oid: u32,
    },

    /// DDL: the stated parent is not a legal parent for this queue.
    #[error("`{parent}` is not a valid parent for queue `{name}`: {reason}")]
    WrongParentQueue {
        /// The queue being created/altered.
        name: String,
        /// The rejected parent name.
        parent: String,
        /// Why the parent is invalid.
        reason: String,
    },

    /// DDL: queue has children or active connections.
    #[error("resource queue `{name}` is in use")]
    QueueInUse {
        /// The queue that cannot be dropped or altered destructively.
        name: String,
    },

    /// DDL: cluster-wide queue count limit reached.
    #[error("cluster already has the maximum of {limit} resource queues")]
    ExceedMaxQueueNumber {
        /// The configured limit.
        limit: u32,
    },

    /// DDL: a required attribute is missing.
    #[error("resource queue `{name}` is missing required attribute `{attr}`")]
    LackAttr {
        /// The queue being defined.
        name: String,
        /// The missing attribute name.
        attr: String,
    },

    /// DDL: an attribute's value failed validation.
    #[error("resource queue `{name}` attribute `{attr}` is invalid: {reason}")]
    WrongAttr {
        /// The queue being defined.
        name: String,
        /// The offending attribute name.
        attr: String,
        /// Why it is invalid.
        reason: String,
    },

    /// DDL: unrecognized attribute name.
    #[error("unknown resource queue attribute `{attr}`")]
    WrongAttrName {
        /// The unrecognized attribute name.
        attr: String,
    },

    /// DDL: malformed attribute value grammar.
    #[error("attribute `{attr}` has malformed value `{value}`")]
    WrongAttrValue {
        /// The offending attribute name.
        attr: String,
        /// The malformed value as supplied.
        value: String,
    },

    /// DDL: percent/absolute expression is internally inconsistent (e.g.
    /// percent memory without matching percent core).
    #[error("resource queue `{name}` has inconsistent resource expression: {reason}")]
    InconsistentResourceExp {
        /// The queue being defined.
        name: String,
        /// Description of the inconsistency.
        reason: String,
    },

    /// DDL: the same attribute supplied twice.
    #[error("attribute `{attr}` supplied more than once")]
    DuplicateAttrName {
        /// The duplicated attribute name.
        attr: String,
    },

    /// Admission/dispatch: no resource is available to satisfy the minimum request.
    #[error("no resource available to satisfy the request")]
    NoResource,

    /// Admission/dispatch: the fixed segment-count request cannot be reconciled.
    #[error("too many fixed virtual segments requested")]
    TooManyFixedSegnum,

    /// Admission/dispatch: this request was chosen as a deadlock victim.
    #[error("request cancelled: deadlock detected")]
    DeadlockDetected,

    /// Admission/dispatch: request waited past `rm_query_resource_noresource_timeout`.
    #[error("request cancelled: timed out waiting for resource")]
    NoResourceTimeout,

    /// Admission/dispatch: no usable cluster segments for this long.
    #[error("request cancelled: no usable cluster segments")]
    NoClusterTimeout,

    /// Pool: no container set registered for the requested ratio.
    #[error("no resource pool entry for ratio {ratio}")]
    ResourcePoolNoRatio {
        /// The memory/core ratio that has no tracker.
        ratio: u32,
    },

    /// Pool: ratio tracker already exists (internal).
    #[error("ratio tracker for {ratio} already exists")]
    DuplicateRatio {
        /// The duplicate ratio.
        ratio: u32,
    },

    /// Pool: could not resolve a preferred host name to a segment.
    #[error("could not resolve host `{host}`")]
    UnresolvedHost {
        /// The host name that failed to resolve.
        host: String,
    },

    /// Pool: segment registration collision (internal).
    #[error("host `{host}` is already registered")]
    DuplicateHost {
        /// The duplicate host name.
        host: String,
    },

    /// Pool: segment id out of range (internal).
    #[error("no host at internal index {index}")]
    InternalNoHostIndex {
        /// The out-of-range index.
        index: u32,
    },

    /// Catalog persistence failed; the in-memory change has been rolled back.
    #[error("catalog persistence failed: {reason}")]
    LibpqFailExecute {
        /// The underlying persistence failure.
        reason: String,
    },

    /// A connection state machine transition was attempted from a state
    /// that does not permit it (internal).
    #[error("illegal state transition: `{action}` is not valid from `{from}`")]
    IllegalStateTransition {
        /// The state the transition was attempted from.
        from: String,
        /// The transition that was attempted.
        action: String,
    },

    /// An internal invariant was violated. The control loop treats this as
    /// fatal: it cannot be repaired mid-run without risking silent
    /// mis-allocation (see the design notes on fatal assertions).
    #[error("internal invariant violated: {message}")]
    Invariant {
        /// Description of the violated invariant.
        message: String,
    },
}

impl RmError {
    /// Stable variant name, for metrics/log correlation.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            RmError::NoUserId { .. } => "NoUserId",
            RmError::NoAssignedQueue { .. } => "NoAssignedQueue",
            RmError::NoQueueName { .. } => "NoQueueName",
            RmError::DuplicateQueueName { .. } => "DuplicateQueueName",
            RmError::DuplicateQueueId { .. } => "DuplicateQueueId",
            RmError::WrongParentQueue { .. } => "WrongParentQueue",
            RmError::QueueInUse { .. } => "QueueInUse",
            RmError::ExceedMaxQueueNumber { .. } => "ExceedMaxQueueNumber",
            RmError::LackAttr { .. } => "LackAttr",
            RmError::WrongAttr { .. } => "WrongAttr",
            RmError::WrongAttrName { .. } => "WrongAttrName",
            RmError::WrongAttrValue { .. } => "WrongAttrValue",
            RmError::InconsistentResourceExp { .. } => "InconsistentResourceExp",
            RmError::DuplicateAttrName { .. } => "DuplicateAttrName",
            RmError::NoResource => "NoResource",
            RmError::TooManyFixedSegnum => "TooManyFixedSegnum",
            RmError::DeadlockDetected => "DeadlockDetected",
            RmError::NoResourceTimeout => "NoResourceTimeout",
            RmError::NoClusterTimeout => "NoClusterTimeout",
            RmError::ResourcePoolNoRatio { .. } => "ResourcePoolNoRatio",
            RmError::DuplicateRatio { .. } => "DuplicateRatio",
            RmError::UnresolvedHost { .. } => "UnresolvedHost",
            RmError::DuplicateHost { .. } => "DuplicateHost",
            RmError::InternalNoHostIndex { .. } => "InternalNoHostIndex",
            RmError::LibpqFailExecute { .. } => "LibpqFailExecute",
            RmError::IllegalStateTransition { .. } => "IllegalStateTransition",
            RmError::Invariant { .. } => "Invariant",
        }
    }

    /// True if the control loop must treat this as fatal (orderly exit)
    /// rather than an ordinary per-request failure.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RmError::Invariant { .. }
                | RmError::LibpqFailExecute { .. }
                | RmError::IllegalStateTransition { .. }
        )
    }
}

impl fmt::Display for RmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A lightweight wrapper carrying just the variant name, used where only
/// classification (not the full message) is needed, e.g. metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RmErrorKind(pub &'static str);

impl From<&RmError> for RmErrorKind {
    fn from(e: &RmError) -> Self {
        RmErrorKind(e.variant_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_name_is_stable() {
        let e = RmError::NoResource;
        assert_eq!(e.variant_name(), "NoResource");
    }

    #[test]
    fn fatal_classification() {
        assert!(RmError::Invariant { message: "x".into() }.is_fatal());
        assert!(!RmError::NoResource.is_fatal());
    }
}
