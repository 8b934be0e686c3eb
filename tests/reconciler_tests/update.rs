//! Stories about converging an existing cluster step by step

use std::sync::Arc;
use std::time::Duration;

use clusterops::model::{AddonsConfig, ClusterSpec, NodePoolSpec, ResourceStatus};
use clusterops::planner::FieldGroup;
use clusterops::Error;

use super::fake::{FakeContainerApi, Rejection};
use super::{base_spec, identity, reconciler};

/// Spec that upgrades master and nodes to 1.2 and turns off HTTP load balancing
fn upgrade_spec(name: &str) -> ClusterSpec {
    let mut spec = base_spec(name);
    spec.min_master_version = Some("1.2".to_string());
    spec.node_version = Some("1.2".to_string());
    spec.addons = Some(AddonsConfig {
        http_load_balancing_disabled: true,
        ..Default::default()
    });
    spec
}

/// Update windows recorded after the create
fn update_calls(api: &FakeContainerApi, name: &str) -> Vec<String> {
    api.windows_for(&identity(name))
        .into_iter()
        .filter(|w| w.call != "create_cluster")
        .map(|w| w.call)
        .collect()
}

// =============================================================================
// Ordered multi-step updates
// =============================================================================

/// Story: An operator bumps master and node versions and flips an add-on.
/// Three operations run one after another, each polled to completion before
/// the next is dispatched.
#[tokio::test(start_paused = true)]
async fn story_upgrade_with_addon_runs_three_ordered_steps() {
    let api = Arc::new(FakeContainerApi::new(2));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    assert!(reconciler.create(&id, &base_spec("web")).await.is_success());

    let outcome = reconciler.update(&id, &upgrade_spec("web")).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    assert_eq!(outcome.applied_steps, 3);
    assert_eq!(outcome.planned_steps, 3);
    assert_eq!(
        update_calls(&api, "web"),
        vec!["master_version", "node_version", "addons"]
    );

    // Two polls for the create, two for each step
    assert_eq!(api.call_count("get_operation"), 8);

    let windows = api.windows_for(&id);
    for pair in windows.windows(2) {
        let end = pair[0].end.expect("every operation finished");
        assert!(end < pair[1].start, "{} overlapped {}", pair[0].call, pair[1].call);
    }

    let state = outcome.final_state.expect("final state is fetched");
    assert_eq!(state.master_version, "1.2");
    assert_eq!(state.node_version, "1.2");
    assert!(state.addons.http_load_balancing_disabled);
}

/// Story: Applying the same spec twice is a no-op the second time
#[tokio::test(start_paused = true)]
async fn story_second_apply_of_same_spec_changes_nothing() {
    let api = Arc::new(FakeContainerApi::new(2));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    assert!(reconciler.create(&id, &base_spec("web")).await.is_success());
    assert!(reconciler.update(&id, &upgrade_spec("web")).await.is_success());
    let calls_before = api.call_count("update_cluster");

    let outcome = reconciler.update(&id, &upgrade_spec("web")).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.planned_steps, 0);
    assert_eq!(outcome.applied_steps, 0);
    assert_eq!(api.call_count("update_cluster"), calls_before);
}

/// Story: A freshly created cluster already matches the spec it was created
/// from
#[tokio::test(start_paused = true)]
async fn story_created_cluster_matches_its_spec() {
    let api = Arc::new(FakeContainerApi::new(1));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    assert!(reconciler.create(&id, &base_spec("web")).await.is_success());
    let steps = reconciler
        .plan(&id, &base_spec("web"))
        .await
        .expect("cluster exists");

    assert!(steps.is_empty(), "unexpected steps: {steps:?}");
}

// =============================================================================
// Partial failure
// =============================================================================

/// Story: The node upgrade operation fails on the control plane. The master
/// upgrade stays applied, the add-on change is never sent, and the outcome
/// names the step that stopped the sequence.
#[tokio::test(start_paused = true)]
async fn story_failed_step_keeps_earlier_steps_and_skips_later_ones() {
    let api = Arc::new(FakeContainerApi::new(2));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    assert!(reconciler.create(&id, &base_spec("web")).await.is_success());
    api.fail_operation("node_version");

    let outcome = reconciler.update(&id, &upgrade_spec("web")).await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.applied_steps, 1);
    assert_eq!(outcome.planned_steps, 3);
    assert!(matches!(outcome.error(), Some(Error::OperationFailed { .. })));

    let failure = outcome.failure.as_ref().expect("failure recorded");
    assert_eq!(failure.step_index, 1);
    let step = failure.step.as_ref().expect("failed inside a planned step");
    assert_eq!(step.group, FieldGroup::NodeVersion);

    assert_eq!(update_calls(&api, "web"), vec!["master_version", "node_version"]);

    let state = api.cluster(&id).expect("cluster still exists");
    assert_eq!(state.master_version, "1.2");
    assert_eq!(state.node_version, "1.1.0");
    assert!(!state.addons.http_load_balancing_disabled);
}

/// Story: A resumed apply after a partial failure only runs what is left
#[tokio::test(start_paused = true)]
async fn story_retrying_after_failure_runs_remaining_steps() {
    let api = Arc::new(FakeContainerApi::new(2));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    assert!(reconciler.create(&id, &base_spec("web")).await.is_success());
    api.fail_operation("node_version");
    assert!(!reconciler.update(&id, &upgrade_spec("web")).await.is_success());

    let outcome = reconciler.update(&id, &upgrade_spec("web")).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    assert_eq!(outcome.planned_steps, 2);
    assert_eq!(outcome.applied_steps, 2);
}

// =============================================================================
// Dispatch rejections
// =============================================================================

/// Story: The control plane briefly answers 503; the step is resent and the
/// plan still completes
#[tokio::test(start_paused = true)]
async fn story_transient_rejections_are_resent() {
    let api = Arc::new(FakeContainerApi::new(1));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    assert!(reconciler.create(&id, &base_spec("web")).await.is_success());
    api.reject("update_cluster", Rejection::Unavailable, 2);

    let outcome = reconciler.update(&id, &upgrade_spec("web")).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    assert_eq!(outcome.applied_steps, 3);
    assert_eq!(api.call_count("update_cluster"), 5);
}

/// Story: A request the control plane refuses outright stops the sequence
/// without resending
#[tokio::test(start_paused = true)]
async fn story_permanent_rejection_stops_at_first_step() {
    let api = Arc::new(FakeContainerApi::new(1));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    assert!(reconciler.create(&id, &base_spec("web")).await.is_success());
    api.reject("update_cluster", Rejection::BadRequest, 1);

    let outcome = reconciler.update(&id, &upgrade_spec("web")).await;

    assert_eq!(outcome.applied_steps, 0);
    assert!(matches!(outcome.error(), Some(Error::RemoteRequest { code: 400, .. })));
    assert_eq!(api.call_count("update_cluster"), 1);
}

/// Story: An invalid spec is rejected before anything is sent
#[tokio::test(start_paused = true)]
async fn story_invalid_update_sends_nothing() {
    let api = Arc::new(FakeContainerApi::new(1));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    assert!(reconciler.create(&id, &base_spec("web")).await.is_success());
    let mut spec = upgrade_spec("web");
    spec.private_cluster = true;

    let outcome = reconciler.update(&id, &spec).await;

    assert!(matches!(outcome.error(), Some(Error::Validation { .. })));
    assert_eq!(outcome.planned_steps, 0);
    assert_eq!(api.call_count("update_cluster"), 0);
}

// =============================================================================
// Node pools
// =============================================================================

/// Story: A new node pool is added while the cluster is still reconciling.
/// The pool waits until the cluster is RUNNING again.
#[tokio::test(start_paused = true)]
async fn story_node_pool_waits_for_parent_to_settle() {
    let api = Arc::new(FakeContainerApi::new(1));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    assert!(reconciler.create(&id, &base_spec("web")).await.is_success());
    api.set_status(&id, ResourceStatus::Pending);

    let settle = {
        let api = api.clone();
        let id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            api.set_status(&id, ResourceStatus::Running);
        })
    };

    let mut spec = base_spec("web");
    spec.node_pools.insert(
        "batch".to_string(),
        NodePoolSpec {
            initial_node_count: 2,
            ..Default::default()
        },
    );
    let outcome = reconciler.update(&id, &spec).await;
    settle.await.expect("settle task");

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    assert_eq!(outcome.applied_steps, 1);
    assert!(api.call_count("get_cluster") > 3);

    let state = api.cluster(&id).expect("cluster exists");
    assert!(state.node_pools.contains_key("batch"));
    assert!(state.node_pools.contains_key("default-pool"));
}

/// Story: Node pool changes are refused while the cluster is broken
#[tokio::test(start_paused = true)]
async fn story_node_pool_refused_on_broken_parent() {
    let api = Arc::new(FakeContainerApi::new(1));
    let reconciler = reconciler(api.clone());
    let id = identity("web");

    assert!(reconciler.create(&id, &base_spec("web")).await.is_success());
    api.set_status(&id, ResourceStatus::Error);

    let mut spec = base_spec("web");
    spec.node_pools.insert("batch".to_string(), NodePoolSpec::default());
    let outcome = reconciler.update(&id, &spec).await;

    assert!(matches!(outcome.error(), Some(Error::ParentNotStable { .. })));
    assert_eq!(outcome.applied_steps, 0);
    assert_eq!(api.call_count("create_node_pool"), 0);
}
