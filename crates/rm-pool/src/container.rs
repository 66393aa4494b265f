// SPDX-License-Identifier: Apache-2.0

//! Provider-granted container lifecycle (spec.md §3 "Container",
//! grounded on `GRMContainer`/`GRMContainerSet` in `resourcepool.c`).
//!
//! A container moves through four stages after it is requested from the
//! provider: `ToAccept` (requested, not yet confirmed) → `Accepted`
//! (granted and usable by the pool) → `ToKick` (the pool decided to
//! return it, provider not yet notified) → `Kicked` (provider notified,
//! awaiting removal). `ProviderMode::None` never populates any of these;
//! all capacity there comes straight from segment heartbeat totals.

/// A single provider-granted unit of resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    /// The provider's own container identifier.
    pub id: String,
    /// The segment this container runs on.
    pub segment_id: crate::segment::SegmentId,
    /// Memory granted to this container, megabytes.
    pub memory_mb: u64,
    /// Cores granted to this container.
    pub core: f64,
    /// The memory/core ratio this container belongs to.
    pub ratio: u32,
}

/// The four-stage pipeline for containers at one (segment, ratio) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSet {
    /// Requested from the provider, not yet confirmed.
    pub to_accept: Vec<Container>,
    /// Confirmed and usable.
    pub accepted: Vec<Container>,
    /// The pool decided to return these; provider not yet told.
    pub to_kick: Vec<Container>,
    /// Provider told to reclaim; awaiting its acknowledgement.
    pub kicked: Vec<Container>,
}

impl ContainerSet {
    /// True if nothing is tracked at any stage.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_accept.is_empty()
            && self.accepted.is_empty()
            && self.to_kick.is_empty()
            && self.kicked.is_empty()
    }

    /// Requests a new container from the provider (stage `ToAccept`).
    pub fn add_to_accept(&mut self, container: Container) {
        self.to_accept.push(container);
    }

    /// Moves every `ToAccept` container into `Accepted`, as when the
    /// provider confirms a batch grant.
    pub fn move_to_accepted(&mut self) {
        self.accepted.append(&mut self.to_accept);
    }

    /// Moves every `Accepted` container into `ToKick`, as when the
    /// breathing pass decides to return idle capacity.
    pub fn move_accepted_to_kick(&mut self, mut predicate: impl FnMut(&Container) -> bool) {
        let (to_kick, remaining): (Vec<_>, Vec<_>) =
            self.accepted.drain(..).partition(|c| predicate(c));
        self.accepted = remaining;
        self.to_kick.extend(to_kick);
    }

    /// Moves every `ToKick` container into `Kicked`, as when the pool has
    /// sent the return notification to the provider.
    pub fn move_to_kick_to_kicked(&mut self) {
        self.kicked.append(&mut self.to_kick);
    }

    /// Drops a `Kicked` container once the provider acknowledges removal.
    pub fn drop_kicked(&mut self, container_id: &str) -> Option<Container> {
        let pos = self.kicked.iter().position(|c| c.id == container_id)?;
        Some(self.kicked.remove(pos))
    }

    /// Total memory currently in the `Accepted` stage, megabytes.
    #[must_use]
    pub fn accepted_memory_mb(&self) -> u64 {
        self.accepted.iter().map(|c| c.memory_mb).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str) -> Container {
        Container {
            id: id.to_string(),
            segment_id: 0,
            memory_mb: 1024,
            core: 1.0,
            ratio: 1024,
        }
    }

    #[test]
    fn lifecycle_moves_through_all_four_stages() {
        let mut set = ContainerSet::default();
        set.add_to_accept(container("c1"));
        assert_eq!(set.to_accept.len(), 1);

        set.move_to_accepted();
        assert_eq!(set.accepted.len(), 1);
        assert_eq!(set.accepted_memory_mb(), 1024);

        set.move_accepted_to_kick(|_| true);
        assert!(set.accepted.is_empty());
        assert_eq!(set.to_kick.len(), 1);

        set.move_to_kick_to_kicked();
        assert_eq!(set.kicked.len(), 1);

        let dropped = set.drop_kicked("c1").unwrap();
        assert_eq!(dropped.id, "c1");
        assert!(set.is_empty());
    }

    #[test]
    fn move_accepted_to_kick_only_matches_predicate() {
        let mut set = ContainerSet::default();
        set.accepted.push(container("keep"));
        set.accepted.push(container("kick"));
        set.move_accepted_to_kick(|c| c.id == "kick");
        assert_eq!(set.accepted.len(), 1);
        assert_eq!(set.accepted[0].id, "keep");
        assert_eq!(set.to_kick.len(), 1);
    }
}
