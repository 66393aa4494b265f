// SPDX-License-Identifier: Apache-2.0

//! End-to-end exercises of [`CoreState`]'s control loop, driven purely
//! through its public surface the way a transport layer would.

use otap_df_rm_core::CoreState;
use otap_df_rm_proto::{AcquireResourceRequest, AcquireResult};
use otap_df_rm_queue::ConnState;

fn new_state() -> CoreState {
    CoreState::new(
        otap_df_rm_config::RmConfig::default(),
        Box::new(otap_df_rm_core::NullCatalogHook::default()),
        Box::new(otap_df_rm_core::NullResourceBroker),
    )
}

fn request(conn_id: u64, session_id: u64, vseg_limit: u32, preferred_hosts: Vec<String>) -> AcquireResourceRequest {
    AcquireResourceRequest {
        conn_id,
        session_id,
        max_seg_count_fix: None,
        min_seg_count_fix: None,
        vseg_limit,
        vseg_limit_per_seg: 8,
        seg_mem_mb: 1024,
        seg_core: 1.0,
        slice_size: 1,
        io_bytes: 0,
        preferred_hosts,
        preferred_scan_sizes: Vec::new(),
    }
}

#[tokio::test]
async fn locality_stage_places_preferred_host_first() {
    let mut state = new_state();
    state.config.tunables.rm_slice_num_per_seg_limit = 8;
    for i in 0..4 {
        state.register_segment(&format!("h{i}"), 16384, 16.0);
    }
    state.users.register("alice", None, false, &state.tree).unwrap();
    state.handle_register(1, "alice").unwrap();
    state.handle_acquire(request(1, 1, 4, vec!["h2".to_string()])).unwrap();

    let responses = state.dispatch_pass();
    assert_eq!(responses.len(), 1);
    match &responses[0].1 {
        AcquireResult::Granted { hosts, .. } => {
            let h2 = hosts.iter().find(|h| h.host == "h2").expect("h2 must be placed");
            assert_eq!(h2.preferred_index, 0);
        }
        other => panic!("expected Granted, got {other:?}"),
    }
}

#[tokio::test]
async fn scarce_cluster_grants_a_partial_allocation() {
    let mut state = new_state();
    state.config.tunables.rm_slice_num_per_seg_limit = 8;
    // Exactly 4 vsegs' worth of memory (4096 / 1024) against a request for 8.
    state.register_segment("h0", 4096, 4.0);
    state.users.register("alice", None, false, &state.tree).unwrap();
    state.handle_register(1, "alice").unwrap();
    state.handle_acquire(request(1, 1, 8, Vec::new())).unwrap();

    let responses = state.dispatch_pass();
    assert_eq!(responses.len(), 1);
    match &responses[0].1 {
        AcquireResult::Granted { hosts, .. } => {
            let total: u32 = hosts.iter().map(|h| h.vseg_count).sum();
            assert_eq!(total, 4, "cluster can only seat 4 vsegs of this shape");
        }
        other => panic!("expected a partial Granted, got {other:?}"),
    }
}

#[tokio::test]
async fn deadlock_sweep_cancels_the_request_blocking_the_head() {
    let mut state = new_state();
    // Room for exactly one vseg: any second concurrent request must wait.
    state.register_segment("h0", 1024, 1.0);
    state.users.register("alice", None, false, &state.tree).unwrap();
    state.users.register("bob", None, false, &state.tree).unwrap();
    state.users.register("carol", None, false, &state.tree).unwrap();

    // Session 900's first request (conn 10) takes the only vseg.
    state.handle_register(10, "alice").unwrap();
    state.handle_acquire(request(10, 900, 1, Vec::new())).unwrap();
    let responses = state.dispatch_pass();
    assert_eq!(responses.len(), 1);
    assert!(matches!(responses[0].1, AcquireResult::Granted { .. }));

    // Session 901 (conn 11) queues behind the now-exhausted cluster.
    state.handle_register(11, "bob").unwrap();
    state.handle_acquire(request(11, 901, 1, Vec::new())).unwrap();
    let responses = state.dispatch_pass();
    assert!(responses.is_empty(), "no capacity left for session 901's request");

    // Session 900's second request (conn 12, same session already holding
    // the cluster's one vseg) queues behind conn 11.
    state.handle_register(12, "carol").unwrap();
    state.handle_acquire(request(12, 900, 1, Vec::new())).unwrap();
    let responses = state.dispatch_pass();
    assert!(responses.is_empty());

    let default_oid = state.tree.get("pg_default").unwrap().oid;
    assert_eq!(state.trackers[&default_oid].pending.len(), 2);

    // The sweep cadence is gated to 5 seconds; one tick at that mark runs it.
    state.timeout_and_deadlock_sweep(5);

    // Conn 12 is cancelled: its session already holds the cluster's only
    // vseg, so freeing it is what lets conn 11's head-of-line request fit.
    assert_eq!(state.conns[&12].state(), ConnState::ResourceAcquireFail);
    assert!(matches!(
        state.last_error.get(&12),
        Some(otap_df_rm_config::RmError::DeadlockDetected)
    ));
    assert_eq!(state.trackers[&default_oid].pending.len(), 1);
    assert_eq!(state.trackers[&default_oid].pending[0].request.conn_id, 11);
}

#[tokio::test]
async fn grant_and_return_round_trip_restores_exact_capacity() {
    let mut state = new_state();
    state.config.tunables.rm_slice_num_per_seg_limit = 8;
    state.register_segment("h0", 16384, 16.0);
    state.users.register("alice", None, false, &state.tree).unwrap();
    state.handle_register(1, "alice").unwrap();
    state.handle_acquire(request(1, 1, 4, Vec::new())).unwrap();

    let responses = state.dispatch_pass();
    assert_eq!(responses.len(), 1);

    state.handle_return(1).unwrap();
    assert_eq!(state.conns[&1].state(), ConnState::RegisterDone);

    let seg = state.pool.segment_by_host("h0").unwrap();
    let ratio_state = seg.ratios.get(&1024).unwrap();
    assert_eq!(ratio_state.available_memory_mb, 16384);
    assert_eq!(ratio_state.available_core, 16.0);
}
