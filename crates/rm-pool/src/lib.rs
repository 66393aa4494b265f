// SPDX-License-Identifier: Apache-2.0

//! Segment registry, container lifecycle, per-ratio accounting, and the
//! two-stage allocator (spec.md §4.1, §4.2).

pub mod breathing;
pub mod container;
pub mod pool;
pub mod ratio;
pub mod segment;

pub use breathing::run_breathing_pass;
pub use container::{Container, ContainerSet};
pub use pool::{compute_ratio, AllocationRequest, AllocationResult, PlacedHost, ResourcePool};
pub use ratio::{MajorityRatioVote, RatioTracker};
pub use segment::{Segment, SegmentId, SegmentRatioState};
