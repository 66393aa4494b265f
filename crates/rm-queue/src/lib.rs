// SPDX-License-Identifier: Apache-2.0

//! Resource queue tree, admission quota computation, dispatch pass,
//! connection state machine, deadlock detector, and the user-to-queue
//! table.

pub mod deadlock;
pub mod dispatch;
pub mod quota;
pub mod queue;
pub mod state;
pub mod tracker;
pub mod tree;
pub mod user;

pub use deadlock::{DeadlockDetector, DeadlockOutcome, QueuedRequestView, SessionLock};
pub use dispatch::{
    classify_queues, dispatch_queue, distribute_remainder, redistribute_proportional,
    DispatchOutcome, QueueStanding,
};
pub use quota::{compute_query_quota, FixedRange, QueryQuota};
pub use queue::{CapacityExpr, QueueOid, QueueStatus, ResourceQueue, SegResourceQuota};
pub use state::{ConnState, ConnTrack};
pub use tracker::{PendingRequest, QueueTracker};
pub use tree::{refresh_percentage_capacity, QueueTree, RefreshedCapacity};
pub use user::{UserInfo, UserTable};
