//! Cluster reconciler
//!
//! Drives create, update, delete and reconcile against the control plane. Each
//! workflow holds the cluster's lock for exactly one logical sequence: the
//! whole create, the parent-level update steps, or one node pool's steps.
//! Within a sequence, step k+1 is dispatched only after step k's operation has
//! finished.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::outcome::{Progress, ReconcileOutcome, Sequence, SequencePhase};
use crate::client::{select_api_version, ApiVersion, ContainerApi, CreateClusterRequest};
use crate::config::ReconcilerConfig;
use crate::lock::ResourceKeyLock;
use crate::model::{ClusterSpec, ObservedCluster, ResourceIdentity, ResourceStatus};
use crate::operation::{Operation, OperationPoller};
use crate::planner::{
    plan, plan_summary, split_by_target, FieldGroup, StepChange, StepTarget, UpdateStep,
};
use crate::retry::{retry_transient, retry_with_backoff};
use crate::{Error, Result, DEFAULT_NODE_POOL};

/// Applies desired cluster specs against the control plane
pub struct Reconciler {
    api: Arc<dyn ContainerApi>,
    locks: Arc<ResourceKeyLock>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a reconciler sharing the process-wide lock table
    pub fn new(api: Arc<dyn ContainerApi>, config: ReconcilerConfig) -> Self {
        Self {
            api,
            locks: ResourceKeyLock::global(),
            config,
        }
    }

    /// Use a specific lock table instead of the process-wide one
    pub fn with_locks(mut self, locks: Arc<ResourceKeyLock>) -> Self {
        self.locks = locks;
        self
    }

    /// The active configuration
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn poller(&self, version: ApiVersion) -> OperationPoller {
        OperationPoller::new(self.api.clone(), version, &self.config)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch a cluster's current state
    #[instrument(skip(self), fields(cluster = %identity))]
    pub async fn get(&self, identity: &ResourceIdentity) -> Result<ObservedCluster> {
        self.fetch(ApiVersion::V1, identity).await
    }

    /// Read the cluster, resending while failures are transient
    async fn fetch(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
    ) -> Result<ObservedCluster> {
        let api = &self.api;
        retry_transient(&self.config.poll_retry, "get_cluster", || {
            api.get_cluster(version, identity)
        })
        .await
    }

    /// Compute the steps an update would run, without running them
    ///
    /// Returns [`Error::NotFound`] when the cluster does not exist yet.
    #[instrument(skip(self, desired), fields(cluster = %identity))]
    pub async fn plan(
        &self,
        identity: &ResourceIdentity,
        desired: &ClusterSpec,
    ) -> Result<Vec<UpdateStep>> {
        let version = select_api_version(desired);
        let observed = self.fetch(version, identity).await?;
        plan(desired, &observed)
    }

    /// Best-effort fetch after the lock is released
    async fn final_state(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
    ) -> Option<ObservedCluster> {
        match self.api.get_cluster(version, identity).await {
            Ok(observed) => Some(observed),
            Err(e) => {
                debug!(error = %e, "could not fetch final cluster state");
                None
            }
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a cluster from `desired`
    ///
    /// Validation runs before anything is sent. If the create operation fails
    /// or times out nothing is recorded locally and the same identity can be
    /// created again. With `remove_default_node_pool` the default pool is
    /// deleted under the same lock right after creation.
    #[instrument(skip(self, desired), fields(cluster = %identity))]
    pub async fn create(
        &self,
        identity: &ResourceIdentity,
        desired: &ClusterSpec,
    ) -> ReconcileOutcome {
        let progress = Progress::default();
        self.create_tracked(identity, desired, &progress).await
    }

    async fn create_tracked(
        &self,
        identity: &ResourceIdentity,
        desired: &ClusterSpec,
        progress: &Progress,
    ) -> ReconcileOutcome {
        if let Err(e) = desired.validate_create(identity) {
            warn!(error = %e, "cluster spec failed validation");
            return ReconcileOutcome::from_progress(progress, None, Some(e));
        }

        let version = select_api_version(desired);
        let request = CreateClusterRequest::from_spec(identity, desired);
        let remove_default = desired.remove_default_node_pool.then(|| UpdateStep {
            group: FieldGroup::NodePoolDelete,
            target: StepTarget::NodePool(DEFAULT_NODE_POOL.to_string()),
            change: StepChange::DeleteNodePool,
        });
        progress.add_planned(1 + usize::from(remove_default.is_some()));

        info!(api_version = %version, "creating cluster");
        let mut sequence = Sequence::lock(&self.locks, identity).await;
        let result = self
            .create_locked(identity, version, &request, remove_default, progress, &mut sequence)
            .await;
        sequence.finish(&result);

        match &result {
            Ok(()) => info!("cluster created"),
            Err(e) => error!(error = %e, "cluster creation failed"),
        }

        let final_state = self.final_state(version, identity).await;
        ReconcileOutcome::from_progress(progress, final_state, result.err())
    }

    async fn create_locked(
        &self,
        identity: &ResourceIdentity,
        version: ApiVersion,
        request: &CreateClusterRequest,
        remove_default: Option<UpdateStep>,
        progress: &Progress,
        sequence: &mut Sequence<'_>,
    ) -> Result<()> {
        progress.begin(None);
        sequence.transition(SequencePhase::StepDispatched);
        let op = self.api.create_cluster(version, request).await?;
        self.poller(version)
            .wait(
                op,
                "creating GKE cluster",
                self.config.poll_interval,
                self.config.create_timeout,
            )
            .await?;
        sequence.transition(SequencePhase::StepTerminal);
        progress.complete_step();

        if let Some(step) = remove_default {
            self.ensure_parent_stable(identity, version).await?;
            self.run_steps(identity, version, std::slice::from_ref(&step), progress, sequence)
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Converge an existing cluster on `desired`
    ///
    /// Parent-level steps run under one lock scope, then each node pool's
    /// steps under its own. The first failing step stops everything; steps
    /// already applied stay applied.
    #[instrument(skip(self, desired), fields(cluster = %identity))]
    pub async fn update(
        &self,
        identity: &ResourceIdentity,
        desired: &ClusterSpec,
    ) -> ReconcileOutcome {
        let progress = Progress::default();
        let version = select_api_version(desired);
        match self.fetch(version, identity).await {
            Ok(observed) => {
                self.update_from(identity, desired, &observed, version, &progress)
                    .await
            }
            Err(e) => ReconcileOutcome::from_progress(&progress, None, Some(e)),
        }
    }

    async fn update_from(
        &self,
        identity: &ResourceIdentity,
        desired: &ClusterSpec,
        observed: &ObservedCluster,
        version: ApiVersion,
        progress: &Progress,
    ) -> ReconcileOutcome {
        let steps = match plan(desired, observed) {
            Ok(steps) => steps,
            Err(e) => {
                warn!(error = %e, "update plan rejected");
                return ReconcileOutcome::from_progress(progress, Some(observed.clone()), Some(e));
            }
        };

        progress.add_planned(steps.len());
        if steps.is_empty() {
            info!("cluster already matches desired spec");
            return ReconcileOutcome::from_progress(progress, Some(observed.clone()), None);
        }
        info!(steps = steps.len(), plan = %plan_summary(&steps), api_version = %version, "updating cluster");

        let (parent, pools) = split_by_target(steps);
        let result = self
            .run_update(identity, version, &parent, &pools, progress)
            .await;

        match &result {
            Ok(()) => info!(applied = progress.applied(), "cluster updated"),
            Err(e) => error!(
                applied = progress.applied(),
                planned = progress.planned(),
                error = %e,
                "cluster update stopped"
            ),
        }

        let final_state = self.final_state(version, identity).await;
        ReconcileOutcome::from_progress(progress, final_state, result.err())
    }

    async fn run_update(
        &self,
        identity: &ResourceIdentity,
        version: ApiVersion,
        parent: &[UpdateStep],
        pools: &[(String, Vec<UpdateStep>)],
        progress: &Progress,
    ) -> Result<()> {
        if !parent.is_empty() {
            let mut sequence = Sequence::lock(&self.locks, identity).await;
            let result = self
                .run_steps(identity, version, parent, progress, &mut sequence)
                .await;
            sequence.finish(&result);
            result?;
        }

        for (pool, steps) in pools {
            debug!(node_pool = %pool, steps = steps.len(), "updating node pool");
            let mut sequence = Sequence::lock(&self.locks, identity).await;
            let result = match self.ensure_parent_stable(identity, version).await {
                Ok(()) => {
                    self.run_steps(identity, version, steps, progress, &mut sequence)
                        .await
                }
                Err(e) => Err(e),
            };
            sequence.finish(&result);
            result?;
        }
        Ok(())
    }

    /// Run steps strictly in order; the caller holds the lock
    async fn run_steps(
        &self,
        identity: &ResourceIdentity,
        version: ApiVersion,
        steps: &[UpdateStep],
        progress: &Progress,
        sequence: &mut Sequence<'_>,
    ) -> Result<()> {
        let poller = self.poller(version);
        for step in steps {
            debug_assert_ne!(sequence.phase(), SequencePhase::StepDispatched);
            progress.begin(Some(step));
            info!(step = %step, "applying step");

            sequence.transition(SequencePhase::StepDispatched);
            let op = self.dispatch(identity, version, step).await?;
            poller
                .wait(
                    op,
                    &step.description(),
                    self.config.poll_interval,
                    self.config.update_timeout,
                )
                .await?;
            sequence.transition(SequencePhase::StepTerminal);
            progress.complete_step();
        }
        Ok(())
    }

    /// Make the step's remote call
    ///
    /// A pool create is resent only while the cluster reports itself busy, so
    /// a 5xx never risks a duplicate. Anything else is retried while the
    /// rejection is transient.
    async fn dispatch(
        &self,
        identity: &ResourceIdentity,
        version: ApiVersion,
        step: &UpdateStep,
    ) -> Result<Operation> {
        let api = &self.api;
        match (&step.target, &step.change) {
            (StepTarget::NodePool(pool), StepChange::CreateNodePool(spec)) => {
                retry_with_backoff(
                    &self.config.dispatch_retry,
                    "create_node_pool",
                    Error::is_not_ready,
                    || api.create_node_pool(version, identity, pool, spec),
                )
                .await
            }
            (StepTarget::NodePool(pool), StepChange::DeleteNodePool) => {
                retry_transient(&self.config.dispatch_retry, "delete_node_pool", || {
                    api.delete_node_pool(version, identity, pool)
                })
                .await
            }
            (StepTarget::NodePool(pool), StepChange::NodePool(update)) => {
                retry_transient(&self.config.dispatch_retry, update.name(), || {
                    api.update_node_pool(version, identity, pool, update)
                })
                .await
            }
            (StepTarget::Cluster, StepChange::Cluster(update)) => {
                retry_transient(&self.config.dispatch_retry, update.name(), || {
                    api.update_cluster(version, identity, update)
                })
                .await
            }
            (target, change) => Err(Error::validation_for(
                &identity.name,
                format!("step {change:?} cannot target {target}"),
            )),
        }
    }

    /// Wait for the parent cluster to accept node pool changes
    ///
    /// RUNNING (or DONE) proceeds. ERROR fails at once. Anything in flight is
    /// re-read every poll interval until the update budget runs out.
    async fn ensure_parent_stable(
        &self,
        identity: &ResourceIdentity,
        version: ApiVersion,
    ) -> Result<()> {
        let deadline = Instant::now() + self.config.update_timeout;
        loop {
            let observed = self.fetch(version, identity).await?;

            match observed.status {
                status if status.is_stable() => return Ok(()),
                ResourceStatus::Error => {
                    return Err(Error::ParentNotStable {
                        cluster: identity.name.clone(),
                        status: observed.status.to_string(),
                    })
                }
                status => {
                    if Instant::now() >= deadline {
                        return Err(Error::ParentNotStable {
                            cluster: identity.name.clone(),
                            status: status.to_string(),
                        });
                    }
                    debug!(status = %status, "waiting for cluster to settle before node pool changes");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a cluster
    ///
    /// A busy cluster rejects deletion as "not ready"; the call is retried
    /// under `delete_retry`, bounded by attempts and elapsed time. Deleting a
    /// cluster that does not exist fails with [`Error::NotFound`].
    #[instrument(skip(self), fields(cluster = %identity))]
    pub async fn delete(&self, identity: &ResourceIdentity) -> Result<()> {
        let version = ApiVersion::V1;
        info!("deleting cluster");

        let mut sequence = Sequence::lock(&self.locks, identity).await;
        let result = self.delete_locked(identity, version, &mut sequence).await;
        sequence.finish(&result);

        match &result {
            Ok(()) => info!("cluster deleted"),
            Err(e) => error!(error = %e, "cluster deletion failed"),
        }
        result
    }

    async fn delete_locked(
        &self,
        identity: &ResourceIdentity,
        version: ApiVersion,
        sequence: &mut Sequence<'_>,
    ) -> Result<()> {
        let api = &self.api;
        sequence.transition(SequencePhase::StepDispatched);
        let op = retry_with_backoff(
            &self.config.delete_retry,
            "delete_cluster",
            |e: &Error| {
                if e.is_not_ready() {
                    warn!("cluster is still not ready to delete, retrying");
                }
                e.is_retryable()
            },
            || api.delete_cluster(version, identity),
        )
        .await?;

        self.poller(version)
            .wait(
                op,
                "deleting GKE cluster",
                self.config.poll_interval,
                self.config.delete_timeout,
            )
            .await?;
        sequence.transition(SequencePhase::StepTerminal);
        Ok(())
    }

    // =========================================================================
    // Reconcile
    // =========================================================================

    /// Create the cluster if it does not exist, otherwise update it, all
    /// within `timeout_budget`
    ///
    /// When the budget runs out the in-flight wait is abandoned (the remote
    /// operation keeps running) and the outcome reports how many steps were
    /// applied.
    #[instrument(skip(self, desired), fields(cluster = %identity))]
    pub async fn reconcile(
        &self,
        identity: &ResourceIdentity,
        desired: &ClusterSpec,
        timeout_budget: Duration,
    ) -> ReconcileOutcome {
        let progress = Progress::default();
        let work = self.reconcile_tracked(identity, desired, &progress);

        match tokio::time::timeout(timeout_budget, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let error = Error::timeout(
                    format!(
                        "reconcile of {} ({} of {} steps applied)",
                        identity,
                        progress.applied(),
                        progress.planned()
                    ),
                    timeout_budget,
                );
                error!(error = %error, "reconcile timed out");
                let final_state = self
                    .final_state(select_api_version(desired), identity)
                    .await;
                ReconcileOutcome::from_progress(&progress, final_state, Some(error))
            }
        }
    }

    async fn reconcile_tracked(
        &self,
        identity: &ResourceIdentity,
        desired: &ClusterSpec,
        progress: &Progress,
    ) -> ReconcileOutcome {
        let version = select_api_version(desired);
        match self.fetch(version, identity).await {
            Ok(observed) => {
                self.update_from(identity, desired, &observed, version, progress)
                    .await
            }
            Err(e) if e.is_not_found() => {
                debug!("cluster does not exist, creating");
                self.create_tracked(identity, desired, progress).await
            }
            Err(e) => ReconcileOutcome::from_progress(progress, None, Some(e)),
        }
    }
}
