// SPDX-License-Identifier: Apache-2.0

//! `CoreState`: the collapsed process-wide singleton (spec.md §9 "wrap
//! them in a single core state value") and the six-phase control loop
//! that operates on it (spec.md §5).

use crate::granted::GrantedResource;
use otap_df_rm_config::{QueueAttrs, RmConfig, RmError};
use otap_df_rm_pool::{run_breathing_pass, ResourcePool};
use otap_df_rm_proto::{
    AcquireResourceRequest, AcquireResult, AllocatedHost, CatalogHook, ResourceBroker,
};
use otap_df_rm_queue::{
    classify_queues, deadlock, dispatch_queue, distribute_remainder, redistribute_proportional,
    refresh_percentage_capacity, ConnState, ConnTrack, DeadlockDetector, DispatchOutcome,
    QueueOid, QueueStanding, QueueTracker, QueueTree, QueuedRequestView, SegResourceQuota, UserTable,
};
use otap_df_rm_telemetry::{MetricsRegistry, RatioMetricKind};
use std::collections::HashMap;

/// Seconds between timeout/deadlock sweeps (spec.md §5 "check cadence").
const SWEEP_CADENCE_SECONDS: u64 = 5;

/// Derives one vseg's `(memory_mb, core)` shape from a queue's fixed
/// quota and the ratio it currently operates at, the inverse operation
/// of [`otap_df_rm_pool::compute_ratio`].
fn vseg_shape(quota: SegResourceQuota, ratio: u32) -> (u64, f64) {
    match quota {
        SegResourceQuota::MemoryMb(mb) => {
            let core = if ratio == 0 { 0.0 } else { mb as f64 / f64::from(ratio) };
            (mb, core)
        }
        SegResourceQuota::VCore(core) => ((core * f64::from(ratio)).round() as u64, core),
    }
}

/// Everything the control loop touches, collapsed into one struct so
/// every phase takes `&mut self` rather than threading a dozen
/// collections through every call (spec.md §9 "central arena").
pub struct CoreState {
    pub config: RmConfig,
    pub pool: ResourcePool,
    pub tree: QueueTree,
    pub trackers: HashMap<QueueOid, QueueTracker>,
    pub users: UserTable,
    pub conns: HashMap<u64, ConnTrack>,
    conn_queue: HashMap<u64, QueueOid>,
    conn_user: HashMap<u64, String>,
    conn_session: HashMap<u64, u64>,
    /// `(seg_mem_mb, seg_core)` the request actually carried at acquire
    /// time, the shape [`otap_df_rm_pool::AllocationRequest`] was built
    /// from; needed at grant time since [`otap_df_rm_pool::AllocationResult`]
    /// only carries placement, not the per-vseg shape that produced it.
    conn_seg_shape: HashMap<u64, (u64, f64)>,
    deadlock: HashMap<QueueOid, DeadlockDetector>,
    granted: HashMap<u64, GrantedResource>,
    pub last_error: HashMap<u64, RmError>,
    remainder_cursors: HashMap<u32, usize>,
    seconds_since_sweep: u64,
    /// Cleared on fatal catalog persistence failure (spec.md §4.6
    /// `ResManagerMainKeepRun`); the process entry point observes this
    /// and exits the control loop in orderly fashion.
    pub keep_running: bool,
    catalog: Box<dyn CatalogHook>,
    broker: Box<dyn ResourceBroker>,
    pub metrics: MetricsRegistry,
}

impl CoreState {
    /// Builds a fresh core with just `pg_root`/`pg_default` registered;
    /// callers call [`CoreState::bootstrap`] to load `config.bootstrap_queues`.
    #[must_use]
    pub fn new(config: RmConfig, catalog: Box<dyn CatalogHook>, broker: Box<dyn ResourceBroker>) -> Self {
        let tree = QueueTree::new();
        let metrics = MetricsRegistry::new().expect("metric registration is infallible");
        let mut state = Self {
            config,
            pool: ResourcePool::new(),
            tree,
            trackers: HashMap::new(),
            users: UserTable::new(),
            conns: HashMap::new(),
            conn_queue: HashMap::new(),
            conn_user: HashMap::new(),
            conn_session: HashMap::new(),
            conn_seg_shape: HashMap::new(),
            deadlock: HashMap::new(),
            granted: HashMap::new(),
            last_error: HashMap::new(),
            remainder_cursors: HashMap::new(),
            seconds_since_sweep: 0,
            keep_running: true,
            catalog,
            broker,
            metrics,
        };
        for oid in state.tree.leaf_oids() {
            state.seed_tracker(oid);
        }
        state
    }

    fn seed_tracker(&mut self, oid: QueueOid) {
        let policy = self
            .tree
            .get_by_oid(oid)
            .map(|q| q.allocation_policy)
            .unwrap_or_default();
        self.trackers.entry(oid).or_insert_with(|| QueueTracker::new(oid, policy));
        self.deadlock.entry(oid).or_insert_with(DeadlockDetector::new);
    }

    /// Creates every queue named in `config.bootstrap_queues`, in the
    /// order given (parents must appear before their children), then
    /// seeds a tracker and deadlock detector for each resulting leaf.
    pub async fn bootstrap(&mut self) -> Result<(), RmError> {
        let queues = self.config.bootstrap_queues.clone();
        let max_queue_number = self.config.tunables.rm_max_resource_queue_number;
        for queue in &queues {
            let attrs = QueueAttrs::from_pairs(&queue.attrs)?;
            let oid = self
                .tree
                .create_queue(&queue.name, &queue.parent, &attrs, self.catalog.as_ref(), max_queue_number)
                .await?;
            self.seed_tracker(oid);
            // A queue that just gained a child stops being a leaf; drop
            // its now-stale tracker rather than dispatching against it.
            if let Some(parent_oid) = self.tree.get_by_oid(oid).and_then(|q| q.parent_oid) {
                if !self.tree.get_by_oid(parent_oid).is_some_and(|q| q.is_leaf()) {
                    self.trackers.remove(&parent_oid);
                    self.deadlock.remove(&parent_oid);
                }
            }
        }
        Ok(())
    }

    /// `REQUEST_QD_REGISTER`: `ESTABLISHED -> REGISTER_DONE`.
    pub fn handle_register(&mut self, conn_id: u64, user_name: &str) -> Result<(), RmError> {
        let queue_oid = self.users.resolve_queue(user_name)?;
        let conn = self.conns.entry(conn_id).or_default();
        conn.register()?;
        self.conn_queue.insert(conn_id, queue_oid);
        self.conn_user.insert(conn_id, user_name.to_string());
        Ok(())
    }

    /// `REQUEST_QD_ACQUIRE_RESOURCE`: computes the per-query quota,
    /// clamps the request to it, and enqueues on the bound queue's FIFO.
    /// `RESOURCE_QUEUE_ALLOC_WAIT` is entered immediately; dispatch
    /// happens on a later [`CoreState::dispatch_pass`].
    pub fn handle_acquire(&mut self, mut request: AcquireResourceRequest) -> Result<(), RmError> {
        let conn_id = request.conn_id;
        let queue_oid = *self.conn_queue.get(&conn_id).ok_or_else(|| RmError::Invariant {
            message: format!("acquire from unregistered connection {conn_id}"),
        })?;
        let conn = self.conns.get_mut(&conn_id).ok_or_else(|| RmError::Invariant {
            message: format!("no connection track for {conn_id}"),
        })?;
        conn.begin_acquire()?;

        let tracker = self.trackers.get_mut(&queue_oid).ok_or_else(|| RmError::Invariant {
            message: format!("no tracker for queue {queue_oid}"),
        })?;

        let avail_node_count = self.pool.segment_ids().len() as u32;
        let requested = otap_df_rm_queue::FixedRange {
            min: request.min_seg_count_fix.unwrap_or(1),
            max: request.max_seg_count_fix.unwrap_or(request.vseg_limit),
        };
        let quota = otap_df_rm_queue::compute_query_quota(
            tracker,
            requested,
            request.vseg_limit,
            request.vseg_limit_per_seg,
            avail_node_count.max(1),
        )?;

        request.vseg_limit = quota.seg_num;
        request.min_seg_count_fix = Some(quota.seg_num_min);

        self.conn_session.insert(conn_id, request.session_id);
        self.conn_seg_shape
            .insert(conn_id, (u64::from(request.seg_mem_mb), request.seg_core));
        tracker.enqueue(request);
        Ok(())
    }

    /// `REQUEST_QD_RETURN_RESOURCE`: releases any granted resource back
    /// to the pool and ratio/deadlock trackers, then returns to
    /// `REGISTER_DONE`.
    pub fn handle_return(&mut self, conn_id: u64) -> Result<(), RmError> {
        let conn = self.conns.get_mut(&conn_id).ok_or_else(|| RmError::Invariant {
            message: format!("no connection track for {conn_id}"),
        })?;
        conn.reset_to_idle()?;

        if let Some(g) = self.granted.remove(&conn_id) {
            let total_mem = g.total_memory_mb();
            let total_core = g.total_core();
            for host in &g.hosts {
                self.pool.release(host.segment_id, g.ratio, host.vseg_count, g.mem_mb, g.core);
            }
            if let Some(detector) = self.deadlock.get_mut(&g.queue_oid) {
                detector.unlock_session_resource(g.session_id, total_mem, total_core);
            }
            if let Some(tracker) = self.trackers.get_mut(&g.queue_oid) {
                tracker.total_allocated_mb = tracker.total_allocated_mb.saturating_sub(total_mem);
                tracker.total_used_mb = tracker.total_used_mb.saturating_sub(total_mem);
                tracker.num_running_queries = tracker.num_running_queries.saturating_sub(1);
            }
        }
        Ok(())
    }

    /// Phase (d): one dispatch pass across every ratio (spec.md §4.3
    /// `dispatchResourceToQueries`).
    pub fn dispatch_pass(&mut self) -> Vec<(u64, AcquireResult)> {
        self.refresh_tracker_capacities();

        let mut ratio_groups: HashMap<u32, Vec<QueueOid>> = HashMap::new();
        for (&oid, tracker) in &self.trackers {
            ratio_groups.entry(tracker.ratio).or_default().push(oid);
        }
        for oids in ratio_groups.values_mut() {
            oids.sort_unstable();
        }

        let mut responses = Vec::new();
        let force_fifo = self.config.tunables.rm_force_fifo_queue;
        let slice_limit_per_seg = self.config.tunables.rm_slice_num_per_seg_limit;

        for (ratio, ordered_oids) in ratio_groups {
            let Some(ratio_tracker) = self.pool.ratio_tracker(ratio) else { continue };
            let ratio_total_mb = ratio_tracker.total_available_memory_mb + ratio_tracker.total_allocated_memory_mb;
            let available_mb = ratio_tracker.total_available_memory_mb;

            let mut sub: HashMap<QueueOid, QueueTracker> = ordered_oids
                .iter()
                .filter_map(|oid| self.trackers.get(oid).map(|t| (*oid, t.clone())))
                .collect();

            let standings = classify_queues(&sub, ratio_total_mb);
            // An over-using queue's stale `total_allocated_mb` is pinned back
            // down to what it's actually using before redistribution, so the
            // excess is freed for under-target queues to claim this pass.
            for (&oid, standing) in &standings {
                if *standing == QueueStanding::OverUsing {
                    if let Some(tracker) = sub.get_mut(&oid) {
                        tracker.total_allocated_mb = tracker.total_used_mb;
                    }
                }
            }
            let (_, remainder) = redistribute_proportional(&mut sub, &standings, available_mb);
            let cursor = self.remainder_cursors.entry(ratio).or_insert(0);
            let _ = distribute_remainder(&mut sub, &ordered_oids, cursor, remainder);

            for (oid, tracker) in sub {
                self.trackers.insert(oid, tracker);
            }

            for oid in &ordered_oids {
                let queue_oid = *oid;
                let Some(mut tracker) = self.trackers.remove(&queue_oid) else { continue };
                let vseg_limit_per_seg_cluster = self
                    .tree
                    .get_by_oid(queue_oid)
                    .map(|q| q.vseg_upper_limit)
                    .unwrap_or(u32::MAX);
                let outcomes = dispatch_queue(
                    &mut tracker,
                    &mut self.pool,
                    ratio,
                    vseg_limit_per_seg_cluster,
                    slice_limit_per_seg,
                    force_fifo,
                );

                for (conn_id, outcome) in outcomes {
                    match outcome {
                        DispatchOutcome::Granted(result) => {
                            if let Some(response) = self.apply_grant(queue_oid, ratio, conn_id, result) {
                                responses.push((conn_id, response));
                            }
                        }
                        DispatchOutcome::Failed(e) => {
                            if e.is_fatal() {
                                self.keep_running = false;
                            }
                            self.last_error.insert(conn_id, e);
                        }
                    }
                }

                self.metrics.set_queue_depth(
                    &self.tree.get_by_oid(queue_oid).map(|q| q.name.clone()).unwrap_or_default(),
                    tracker.pending.len() as u32,
                );
                self.trackers.insert(queue_oid, tracker);
            }
        }

        self.publish_ratio_metrics();
        responses
    }

    fn apply_grant(
        &mut self,
        queue_oid: QueueOid,
        ratio: u32,
        conn_id: u64,
        result: otap_df_rm_pool::AllocationResult,
    ) -> Option<AcquireResult> {
        let conn = self.conns.get_mut(&conn_id)?;
        if conn.grant().is_err() {
            return None;
        }

        // The shape the allocator actually placed, captured at acquire
        // time; a queue's `seg_resource_quota` only governs cluster
        // capacity planning (see `refresh_tracker_capacities`), not what
        // gets reported back or released per vseg.
        let (mem_mb, core) = self.conn_seg_shape.remove(&conn_id).unwrap_or((0, 0.0));
        let session_id = self.conn_session.get(&conn_id).copied().unwrap_or(0);

        let hosts: Vec<AllocatedHost> = result
            .hosts
            .iter()
            .map(|h| AllocatedHost {
                host: self
                    .pool
                    .segment_by_host_id(h.segment_id)
                    .map(|s| s.host_name.clone())
                    .unwrap_or_default(),
                vseg_count: h.vseg_count,
                preferred_index: h.preferred_index,
            })
            .collect();

        let granted = GrantedResource {
            queue_oid,
            session_id,
            ratio,
            mem_mb,
            core,
            hosts: result.hosts,
        };
        self.deadlock
            .entry(queue_oid)
            .or_default()
            .lock_session_resource(session_id, granted.total_memory_mb(), granted.total_core());
        self.granted.insert(conn_id, granted);

        Some(AcquireResult::Granted {
            hosts,
            seg_mem_mb: mem_mb as u32,
            seg_core: core,
            vseg_io_bytes: result.vseg_io_bytes,
        })
    }

    fn refresh_tracker_capacities(&mut self) {
        let (cluster_mem, cluster_core) = self.pool.cluster_totals();
        let majority_ratio = self.pool.majority_ratio().unwrap_or(0);

        let oids: Vec<QueueOid> = self.trackers.keys().copied().collect();
        for oid in oids {
            let Some(queue) = self.tree.get_by_oid(oid) else { continue };
            let queue = queue.clone();
            let refreshed = refresh_percentage_capacity(&self.tree, &queue, cluster_mem, cluster_core);
            if let Some(tracker) = self.trackers.get_mut(&oid) {
                tracker.ratio = majority_ratio;
                tracker.cluster_memory_mb = refreshed.cluster_memory_mb;
                tracker.cluster_memory_max_mb = refreshed.cluster_memory_max_mb;
                let (vseg_mem_mb, _) = vseg_shape(queue.seg_resource_quota, majority_ratio);
                if vseg_mem_mb > 0 {
                    tracker.cluster_seg_number = (refreshed.cluster_memory_mb / vseg_mem_mb) as u32;
                    tracker.cluster_seg_number_max = (refreshed.cluster_memory_max_mb / vseg_mem_mb) as u32;
                }
            }
        }
    }

    fn publish_ratio_metrics(&self) {
        for ratio in self.pool.ratios() {
            if let Some(t) = self.pool.ratio_tracker(ratio) {
                self.metrics
                    .set_ratio_memory_mb(ratio, RatioMetricKind::Allocated, t.total_allocated_memory_mb as f64);
                self.metrics
                    .set_ratio_core(ratio, RatioMetricKind::Allocated, t.total_allocated_core);
            }
        }
    }

    /// Phase (e): advances every connection's idle clock, then (gated to
    /// [`SWEEP_CADENCE_SECONDS`]) sweeps timeouts and runs the deadlock
    /// detector against every leaf queue's pending FIFO.
    pub fn timeout_and_deadlock_sweep(&mut self, elapsed_seconds: u64) {
        for conn in self.conns.values_mut() {
            conn.tick(elapsed_seconds);
        }

        self.seconds_since_sweep += elapsed_seconds;
        if self.seconds_since_sweep < SWEEP_CADENCE_SECONDS {
            return;
        }
        self.seconds_since_sweep = 0;

        self.sweep_timeouts();
        self.sweep_deadlocks();
    }

    fn sweep_timeouts(&mut self) {
        let deadline = self.config.tunables.rm_query_resource_noresource_timeout_seconds;
        let timed_out: Vec<u64> = self
            .conns
            .iter()
            .filter(|(_, c)| {
                c.state() == ConnState::ResourceQueueAllocWait && c.seconds_since_transition() >= deadline
            })
            .map(|(&id, _)| id)
            .collect();

        for conn_id in timed_out {
            let Some(&queue_oid) = self.conn_queue.get(&conn_id) else { continue };
            if let Some(tracker) = self.trackers.get_mut(&queue_oid) {
                tracker.pending.retain(|p| p.request.conn_id != conn_id);
            }
            if let Some(conn) = self.conns.get_mut(&conn_id) {
                let _ = conn.timeout();
            }
            self.conn_seg_shape.remove(&conn_id);
            self.last_error.insert(conn_id, RmError::NoResourceTimeout);
        }
    }

    fn sweep_deadlocks(&mut self) {
        let oids: Vec<QueueOid> = self.trackers.keys().copied().collect();
        for oid in oids {
            let Some(tracker) = self.trackers.get(&oid) else { continue };
            let cluster_memory_max_mb = tracker.cluster_memory_max_mb;
            let mut views: Vec<QueuedRequestView> = tracker
                .pending
                .iter()
                .map(|p| QueuedRequestView {
                    conn_id: p.request.conn_id,
                    session_id: p.request.session_id,
                    seg_mem_mb: u64::from(p.request.seg_mem_mb),
                    seg_num_min: p.request.min_seg_count_fix.unwrap_or(1),
                    seg_core: p.request.seg_core,
                })
                .collect();

            let Some(detector) = self.deadlock.get_mut(&oid) else { continue };
            // `cluster_core_max` is not separately tracked on the
            // tracker today; the memory cap alone already determines the
            // early-skip case in practice since vsegs are sized by the
            // same ratio, so core is derived proportionally.
            let cluster_core_max = tracker.ratio.checked_sub(0).map(|r| {
                if r == 0 { 0.0 } else { cluster_memory_max_mb as f64 / f64::from(r) }
            }).unwrap_or(0.0);

            let outcome = deadlock::detect_and_resolve(
                detector,
                &mut views,
                cluster_memory_max_mb,
                cluster_core_max,
            );

            if outcome.cancelled_conn_ids.is_empty() {
                continue;
            }
            if let Some(tracker) = self.trackers.get_mut(&oid) {
                tracker.pending.retain(|p| !outcome.cancelled_conn_ids.contains(&p.request.conn_id));
            }
            for conn_id in outcome.cancelled_conn_ids {
                if let Some(conn) = self.conns.get_mut(&conn_id) {
                    let _ = conn.fail();
                }
                self.conn_seg_shape.remove(&conn_id);
                self.last_error.insert(conn_id, RmError::DeadlockDetected);
            }
        }
    }

    /// Phase (f): returns idle provider-granted containers for every
    /// known ratio (spec.md §4.2 "breathing"; a no-op per ratio under
    /// `ProviderMode::None` since no containers are ever accepted).
    pub async fn breathe_out(&mut self) {
        let percentage = u64::from(self.config.tunables.rm_grm_breath_return_percentage);
        let min_retain = self.config.tunables.rm_seg_container_default_waterlevel;
        let segment_ids = self.pool.segment_ids();

        for ratio in self.pool.ratios() {
            let total_accepted: u64 = segment_ids
                .iter()
                .map(|&id| self.pool.container_set_len(id, ratio) as u64)
                .sum();
            let max_return = (total_accepted * percentage / 100) as u32;
            if max_return == 0 {
                continue;
            }
            let returned = run_breathing_pass(&mut self.pool, ratio, &segment_ids, max_return, min_retain);
            if returned.is_empty() {
                continue;
            }
            let ids: Vec<String> = returned.iter().map(|c| c.id.clone()).collect();
            if let Err(e) = self.broker.release(&ids).await {
                tracing::warn!(?e, ratio, "failed to notify provider of breathed-out containers");
            }
        }
    }

    /// Registers a heartbeat report, recomputing the cluster-wide
    /// majority ratio as a side effect (phase (b)).
    pub fn register_segment(&mut self, host_name: &str, total_memory_mb: u64, total_core: f64) {
        self.pool.register_segment(host_name, total_memory_mb, total_core);
    }

    /// Runs phases (d) through (f) for one tick. RPC intake, heartbeat
    /// intake, and provider response polling (phases (a)-(c)) are driven
    /// by the transport layer calling [`CoreState::handle_register`],
    /// [`CoreState::handle_acquire`], [`CoreState::register_segment`],
    /// and the broker poll directly, ahead of this call, per spec.md §5's
    /// phase ordering.
    pub async fn tick(&mut self, elapsed_seconds: u64) -> Vec<(u64, AcquireResult)> {
        let responses = self.dispatch_pass();
        self.timeout_and_deadlock_sweep(elapsed_seconds);
        self.breathe_out().await;
        responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otap_df_rm_proto::{NullCatalogHook, NullResourceBroker};

    fn fresh_state() -> CoreState {
        CoreState::new(
            RmConfig::default(),
            Box::new(NullCatalogHook::default()),
            Box::new(NullResourceBroker),
        )
    }

    fn request(conn_id: u64) -> AcquireResourceRequest {
        AcquireResourceRequest {
            conn_id,
            session_id: conn_id,
            max_seg_count_fix: None,
            min_seg_count_fix: None,
            vseg_limit: 4,
            vseg_limit_per_seg: 8,
            seg_mem_mb: 1024,
            seg_core: 1.0,
            slice_size: 1,
            io_bytes: 0,
            preferred_hosts: Vec::new(),
            preferred_scan_sizes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn single_host_acquire_dispatches_and_releases() {
        let mut state = fresh_state();
        state.config.tunables.rm_slice_num_per_seg_limit = 8;
        state.register_segment("h0", 16384, 16.0);
        state.users.register("alice", None, false, &state.tree).unwrap();

        state.handle_register(1, "alice").unwrap();
        state.handle_acquire(request(1)).unwrap();

        let responses = state.dispatch_pass();
        assert_eq!(responses.len(), 1);
        match &responses[0].1 {
            AcquireResult::Granted { hosts, .. } => {
                assert_eq!(hosts.iter().map(|h| h.vseg_count).sum::<u32>(), 4);
            }
            other => panic!("expected Granted, got {other:?}"),
        }

        state.handle_return(1).unwrap();
        let (available_mb, available_core) = {
            let seg = state.pool.segment_by_host("h0").unwrap();
            let ratio_state = seg.ratios.get(&1024).unwrap();
            (ratio_state.available_memory_mb, ratio_state.available_core)
        };
        assert_eq!(available_mb, 16384);
        assert_eq!(available_core, 16.0);
    }

    #[tokio::test]
    async fn register_before_segment_join_still_queues_request() {
        let mut state = fresh_state();
        state.users.register("bob", None, false, &state.tree).unwrap();
        state.handle_register(2, "bob").unwrap();
        state.handle_acquire(request(2)).unwrap();

        let responses = state.dispatch_pass();
        assert!(responses.is_empty());
        let default_oid = state.tree.get("pg_default").unwrap().oid;
        assert_eq!(state.trackers[&default_oid].pending.len(), 1);
    }

    #[tokio::test]
    async fn timeout_sweep_cancels_request_past_deadline() {
        let mut state = fresh_state();
        state.config.tunables.rm_query_resource_noresource_timeout_seconds = 10;
        state.users.register("carol", None, false, &state.tree).unwrap();
        state.handle_register(3, "carol").unwrap();
        state.handle_acquire(request(3)).unwrap();

        state.timeout_and_deadlock_sweep(5);
        state.timeout_and_deadlock_sweep(10);

        assert_eq!(state.conns[&3].state(), ConnState::TimeoutFail);
        assert!(matches!(state.last_error.get(&3), Some(RmError::NoResourceTimeout)));
    }
}
