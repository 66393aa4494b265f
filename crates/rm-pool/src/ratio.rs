// SPDX-License-Identifier: Apache-2.0

//! Cluster-wide per-ratio accounting and the majority-ratio vote
//! (spec.md §9 "ratio pool as HashMap"; the vote counter is grounded on
//! `PRESPOOL->MemCoreRatioMajorityCounter` in `resourcepool.c`, a
//! textbook Boyer-Moore majority vote run incrementally as segments
//! register).

/// Cluster-wide totals for one memory/core ratio (megabytes of memory
/// per core, rounded to the nearest integer).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RatioTracker {
    /// The ratio this tracker accounts for.
    pub ratio: u32,
    /// Total memory available across every segment at this ratio, MB.
    pub total_available_memory_mb: u64,
    /// Total cores available across every segment at this ratio.
    pub total_available_core: f64,
    /// Total memory allocated to in-flight requests at this ratio, MB.
    pub total_allocated_memory_mb: u64,
    /// Total cores allocated to in-flight requests at this ratio.
    pub total_allocated_core: f64,
    /// Memory requested but not yet placed, summed over pending requests.
    pub pending_memory_mb: u64,
    /// Cores requested but not yet placed, summed over pending requests.
    pub pending_core: f64,
}

impl RatioTracker {
    /// Creates an empty tracker for `ratio`.
    #[must_use]
    pub fn new(ratio: u32) -> Self {
        Self {
            ratio,
            ..Default::default()
        }
    }

    /// Records `count` additional pending vsegs of `(mem, core)` each.
    pub fn inc_pending(&mut self, mem_mb: u64, core: f64, count: u32) {
        self.pending_memory_mb += mem_mb * u64::from(count);
        self.pending_core += core * f64::from(count);
    }

    /// Reverses a prior [`RatioTracker::inc_pending`] call, e.g. once the
    /// request has been placed or cancelled.
    pub fn dec_pending(&mut self, mem_mb: u64, core: f64, count: u32) {
        self.pending_memory_mb = self.pending_memory_mb.saturating_sub(mem_mb * u64::from(count));
        self.pending_core = (self.pending_core - core * f64::from(count)).max(0.0);
    }

    /// Moves `(mem, core)` from available into allocated.
    pub fn allocate(&mut self, mem_mb: u64, core: f64) {
        self.total_available_memory_mb = self.total_available_memory_mb.saturating_sub(mem_mb);
        self.total_available_core = (self.total_available_core - core).max(0.0);
        self.total_allocated_memory_mb += mem_mb;
        self.total_allocated_core += core;
    }

    /// Moves `(mem, core)` from allocated back into available, as when a
    /// request returns its resource.
    pub fn release(&mut self, mem_mb: u64, core: f64) {
        self.total_allocated_memory_mb = self.total_allocated_memory_mb.saturating_sub(mem_mb);
        self.total_allocated_core = (self.total_allocated_core - core).max(0.0);
        self.total_available_memory_mb += mem_mb;
        self.total_available_core += core;
    }
}

/// Incrementally tracks the majority memory/core ratio across registering
/// segments using the Boyer-Moore majority vote algorithm: each new
/// segment's ratio either matches the current candidate (counter up) or
/// doesn't (counter down); on underflow the candidate resets to the new
/// value with a count of one. With a true cluster-wide majority ratio
/// this converges to the correct candidate regardless of arrival order,
/// without retaining a per-ratio histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MajorityRatioVote {
    candidate: Option<u32>,
    counter: i64,
}

impl MajorityRatioVote {
    /// Creates an empty vote tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Casts one segment's ratio into the running vote.
    pub fn cast(&mut self, ratio: u32) {
        match self.candidate {
            None => {
                self.candidate = Some(ratio);
                self.counter = 1;
            }
            Some(c) if c == ratio => self.counter += 1,
            Some(_) => {
                self.counter -= 1;
                if self.counter < 0 {
                    self.candidate = Some(ratio);
                    self.counter = 1;
                }
            }
        }
    }

    /// Withdraws one prior vote for `ratio`, as when a segment is
    /// dropped from the pool. Mirrors the decrement-and-reset-to-one
    /// behavior the registration path uses when a host's reported ratio
    /// changes underneath an existing registration.
    pub fn withdraw(&mut self, ratio: u32) {
        match self.candidate {
            Some(c) if c == ratio => {
                self.counter -= 1;
                if self.counter < 0 {
                    self.candidate = None;
                    self.counter = 0;
                }
            }
            _ => {
                self.counter += 1;
            }
        }
    }

    /// The current majority candidate, if any segments have voted.
    #[must_use]
    pub fn candidate(&self) -> Option<u32> {
        self.candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_allocate_and_release_round_trip() {
        let mut t = RatioTracker::new(1024);
        t.total_available_memory_mb = 16384;
        t.total_available_core = 16.0;
        t.allocate(1024, 1.0);
        assert_eq!(t.total_available_memory_mb, 15360);
        assert_eq!(t.total_allocated_memory_mb, 1024);
        t.release(1024, 1.0);
        assert_eq!(t.total_available_memory_mb, 16384);
        assert_eq!(t.total_allocated_memory_mb, 0);
    }

    #[test]
    fn majority_vote_converges_on_true_majority() {
        let mut vote = MajorityRatioVote::new();
        for ratio in [1024, 1024, 512, 1024, 256, 1024, 1024] {
            vote.cast(ratio);
        }
        assert_eq!(vote.candidate(), Some(1024));
    }

    #[test]
    fn majority_vote_with_no_majority_can_be_wrong_but_never_panics() {
        let mut vote = MajorityRatioVote::new();
        for ratio in [1, 2, 3, 4] {
            vote.cast(ratio);
        }
        assert!(vote.candidate().is_some());
    }

    #[test]
    fn pending_accounting_saturates_rather_than_overflows() {
        let mut t = RatioTracker::new(1024);
        t.dec_pending(100, 1.0, 1);
        assert_eq!(t.pending_memory_mb, 0);
        assert_eq!(t.pending_core, 0.0);
    }
}
