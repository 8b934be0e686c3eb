//! Stories about creating clusters

use std::sync::Arc;
use std::time::Duration;

use clusterops::model::ResourceStatus;
use clusterops::Error;

use super::fake::FakeContainerApi;
use super::{base_spec, identity, reconciler};

// =============================================================================
// Create
// =============================================================================

/// Story: Creating a cluster dispatches one call and polls its operation
/// until DONE
#[tokio::test(start_paused = true)]
async fn story_create_waits_for_operation() {
    let api = Arc::new(FakeContainerApi::new(3));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    let outcome = reconciler.create(&id, &base_spec("web")).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    assert_eq!(outcome.planned_steps, 1);
    assert_eq!(outcome.applied_steps, 1);
    assert_eq!(api.call_count("create_cluster"), 1);
    assert_eq!(api.call_count("get_operation"), 3);

    let state = outcome.final_state.expect("final state is fetched");
    assert_eq!(state.status, ResourceStatus::Running);
    assert_eq!(state.master_version, "1.1.0");
    assert_eq!(state.node_pools["default-pool"].node_count, 3);
}

/// Story: The create operation fails remotely. Nothing lingers, so an
/// immediate second create with the same name goes through.
#[tokio::test(start_paused = true)]
async fn story_failed_create_leaves_name_reusable() {
    let api = Arc::new(FakeContainerApi::new(2));
    let reconciler = reconciler(api.clone());
    let id = identity("web");
    api.fail_operation("create_cluster");

    let failed = reconciler.create(&id, &base_spec("web")).await;

    assert!(matches!(failed.error(), Some(Error::OperationFailed { .. })));
    assert_eq!(failed.applied_steps, 0);
    assert!(failed.final_state.is_none());
    assert!(api.cluster(&id).is_none());

    let retried = reconciler.create(&id, &base_spec("web")).await;

    assert!(retried.is_success(), "{:?}", retried.failure);
    assert_eq!(retried.applied_steps, 1);
    assert!(api.cluster(&id).is_some());
}

/// Story: A spec asking to drop the auto-provisioned pool gets it deleted
/// right after creation, in the same sequence
#[tokio::test(start_paused = true)]
async fn story_create_removes_default_pool_on_request() {
    let api = Arc::new(FakeContainerApi::new(2));
    let reconciler = reconciler(api.clone());
    let id = identity("web");
    let mut spec = base_spec("web");
    spec.initial_node_count = 1;
    spec.remove_default_node_pool = true;

    let outcome = reconciler.create(&id, &spec).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    assert_eq!(outcome.planned_steps, 2);
    assert_eq!(outcome.applied_steps, 2);

    let calls: Vec<String> = api.windows_for(&id).into_iter().map(|w| w.call).collect();
    assert_eq!(calls, vec!["create_cluster", "delete_node_pool"]);

    let state = api.cluster(&id).expect("cluster exists");
    assert!(state.node_pools.is_empty());
}

/// Story: Mismatched initial versions are caught before anything is sent
#[tokio::test(start_paused = true)]
async fn story_invalid_create_sends_nothing() {
    let api = Arc::new(FakeContainerApi::new(1));
    let reconciler = reconciler(api.clone());
    let id = identity("web");
    let mut spec = base_spec("web");
    spec.node_version = Some("1.2.0".to_string());

    let outcome = reconciler.create(&id, &spec).await;

    assert!(matches!(outcome.error(), Some(Error::Validation { .. })));
    assert_eq!(outcome.planned_steps, 0);
    assert!(api.calls().is_empty());
}

// =============================================================================
// Reconcile
// =============================================================================

/// Story: Reconcile creates a missing cluster, then updates it on the next
/// run
#[tokio::test(start_paused = true)]
async fn story_reconcile_creates_then_updates() {
    let api = Arc::new(FakeContainerApi::new(2));
    let reconciler = reconciler(api.clone());
    let id = identity("web");
    let budget = Duration::from_secs(600);

    let created = reconciler.reconcile(&id, &base_spec("web"), budget).await;
    assert!(created.is_success(), "{:?}", created.failure);
    assert_eq!(created.applied_steps, 1);
    assert_eq!(api.call_count("create_cluster"), 1);

    let mut spec = base_spec("web");
    spec.min_master_version = Some("1.2".to_string());
    let updated = reconciler.reconcile(&id, &spec, budget).await;

    assert!(updated.is_success(), "{:?}", updated.failure);
    assert_eq!(updated.applied_steps, 1);
    assert_eq!(api.call_count("create_cluster"), 1);
    assert_eq!(api.cluster(&id).expect("exists").master_version, "1.2");
}

/// Story: The overall budget runs out while the create is still in flight.
/// The caller gets a timeout naming the partial progress; the remote
/// operation keeps running.
#[tokio::test(start_paused = true)]
async fn story_reconcile_budget_abandons_in_flight_create() {
    let api = Arc::new(FakeContainerApi::new(100));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    let outcome = reconciler
        .reconcile(&id, &base_spec("web"), Duration::from_secs(30))
        .await;

    match outcome.error() {
        Some(Error::TimeoutExceeded { what, .. }) => {
            assert!(what.contains("0 of 1 steps applied"), "{what}")
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(outcome.applied_steps, 0);
    assert_eq!(outcome.planned_steps, 1);
    // Re-read after the timeout; the create has not landed yet
    assert!(outcome.final_state.is_none());
    assert!(api.call_count("get_cluster") >= 2);

    let windows = api.windows_for(&id);
    assert_eq!(windows.len(), 1);
    assert!(windows[0].end.is_none());
}
