//! In-memory control plane
//!
//! Every mutation returns a RUNNING operation that reaches DONE after a fixed
//! number of status queries; its effect lands on the stored cluster only
//! then. Each mutation's window (dispatch to terminal poll) is recorded on a
//! logical clock so tests can check that sequences on one cluster never
//! overlap.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use clusterops::client::{
    ApiVersion, ClusterUpdate, ContainerApi, CreateClusterRequest, NodePoolUpdate,
};
use clusterops::model::{
    NodePoolSpec, ObservedCluster, ObservedNodePool, ResourceIdentity, ResourceStatus,
};
use clusterops::operation::{Operation, OperationError};
use clusterops::{Error, Result, DEFAULT_NODE_POOL};

/// A synchronous rejection queued for the next call of one method
#[derive(Clone, Copy, Debug)]
pub enum Rejection {
    /// The cluster is busy with another operation
    NotReady,
    /// The service is temporarily unavailable
    Unavailable,
    /// The request is invalid
    BadRequest,
}

impl Rejection {
    fn into_error(self, method: &str) -> Error {
        match self {
            Rejection::NotReady => Error::remote_not_ready(
                method,
                "Cluster is running incompatible operation operation-busy",
            ),
            Rejection::Unavailable => Error::remote(method, 503, "service unavailable"),
            Rejection::BadRequest => Error::remote(method, 400, "invalid request"),
        }
    }
}

/// When one mutation was in flight, on the fake's logical clock
#[derive(Clone, Debug)]
pub struct CallWindow {
    pub cluster: String,
    pub call: String,
    pub start: u64,
    pub end: Option<u64>,
}

impl CallWindow {
    /// True when both windows were open at the same logical time
    pub fn overlaps(&self, other: &CallWindow) -> bool {
        let self_end = self.end.unwrap_or(u64::MAX);
        let other_end = other.end.unwrap_or(u64::MAX);
        self.start < other_end && other.start < self_end
    }
}

enum Effect {
    Create(CreateClusterRequest),
    Update(ClusterUpdate),
    Delete,
    CreatePool(String, NodePoolSpec),
    DeletePool(String),
    UpdatePool(String, NodePoolUpdate),
}

struct FakeOperation {
    target: ResourceIdentity,
    call: String,
    polls: u32,
    failed: bool,
    terminal: bool,
    effect: Option<Effect>,
    window: usize,
}

#[derive(Default)]
struct State {
    clusters: HashMap<String, ObservedCluster>,
    operations: HashMap<String, FakeOperation>,
    next_operation: u64,
    rejections: HashMap<String, VecDeque<Rejection>>,
    failing_calls: HashSet<String>,
    windows: Vec<CallWindow>,
    calls: Vec<String>,
}

/// Fake `ContainerApi` keeping clusters and operations in memory
pub struct FakeContainerApi {
    state: Mutex<State>,
    clock: AtomicU64,
    polls_until_done: u32,
}

impl FakeContainerApi {
    /// Operations finish on their `polls_until_done`-th status query
    pub fn new(polls_until_done: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock: AtomicU64::new(0),
            polls_until_done: polls_until_done.max(1),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Current stored state of a cluster
    pub fn cluster(&self, identity: &ResourceIdentity) -> Option<ObservedCluster> {
        self.state().clusters.get(&identity.lock_key()).cloned()
    }

    /// Change a stored cluster's status
    pub fn set_status(&self, identity: &ResourceIdentity, status: ResourceStatus) {
        if let Some(cluster) = self.state().clusters.get_mut(&identity.lock_key()) {
            cluster.status = status;
        }
    }

    /// Reject the next `times` calls of `method` before accepting
    pub fn reject(&self, method: &str, rejection: Rejection, times: usize) {
        let mut state = self.state();
        let queue = state.rejections.entry(method.to_string()).or_default();
        queue.extend(std::iter::repeat(rejection).take(times));
    }

    /// The next operation started for `call` finishes with an error payload
    ///
    /// `call` is the create/delete method name or the update's short name.
    pub fn fail_operation(&self, call: &str) {
        self.state().failing_calls.insert(call.to_string());
    }

    /// Every mutation window recorded so far
    pub fn windows(&self) -> Vec<CallWindow> {
        self.state().windows.clone()
    }

    /// Windows belonging to one cluster
    pub fn windows_for(&self, identity: &ResourceIdentity) -> Vec<CallWindow> {
        let key = identity.lock_key();
        self.windows()
            .into_iter()
            .filter(|w| w.cluster == key)
            .collect()
    }

    /// Names of every call made, in order
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// How many times `method` was called
    pub fn call_count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| *c == method).count()
    }

    fn record_call(&self, method: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(method.to_string());
        match state.rejections.get_mut(method).and_then(VecDeque::pop_front) {
            Some(rejection) => Err(rejection.into_error(method)),
            None => Ok(()),
        }
    }

    fn start(&self, target: &ResourceIdentity, call: &str, effect: Effect) -> Operation {
        let start = self.tick();
        let mut state = self.state();
        state.next_operation += 1;
        let id = format!("operation-{}", state.next_operation);
        let failed = state.failing_calls.remove(call);

        let window = state.windows.len();
        state.windows.push(CallWindow {
            cluster: target.lock_key(),
            call: call.to_string(),
            start,
            end: None,
        });
        state.operations.insert(
            id.clone(),
            FakeOperation {
                target: target.clone(),
                call: call.to_string(),
                polls: 0,
                failed,
                terminal: false,
                effect: Some(effect),
                window,
            },
        );

        let mut operation = Operation::pending(id, target.clone());
        operation.operation_type = call.to_string();
        operation.status = ResourceStatus::Running;
        operation
    }

    fn require_cluster(&self, identity: &ResourceIdentity) -> Result<()> {
        if self.state().clusters.contains_key(&identity.lock_key()) {
            Ok(())
        } else {
            Err(Error::not_found(identity.full_name()))
        }
    }
}

fn created_cluster(request: &CreateClusterRequest) -> ObservedCluster {
    let spec = &request.spec;
    let version = spec
        .min_master_version
        .clone()
        .unwrap_or_else(|| "1.10.9-gke.5".to_string());
    let node_version = spec.node_version.clone().unwrap_or_else(|| version.clone());

    let mut node_pools = BTreeMap::new();
    if spec.node_pools.is_empty() {
        node_pools.insert(
            DEFAULT_NODE_POOL.to_string(),
            ObservedNodePool {
                status: ResourceStatus::Running,
                node_count: spec.initial_node_count,
                version: node_version.clone(),
                ..Default::default()
            },
        );
    }
    for (name, pool) in &spec.node_pools {
        node_pools.insert(name.clone(), observed_pool(pool, &node_version));
    }

    let location = request.identity.location.clone();
    let locations = if request.locations.is_empty() {
        vec![location.clone()]
    } else {
        request.locations.clone()
    };

    ObservedCluster {
        name: request.identity.name.clone(),
        location,
        status: ResourceStatus::Running,
        endpoint: Some("10.0.0.1".to_string()),
        master_version: version,
        node_version,
        master_authorized_networks: spec.master_authorized_networks.clone(),
        addons: spec.addons.clone().unwrap_or_default(),
        maintenance_policy: spec.maintenance_policy.clone(),
        locations,
        legacy_abac: spec.enable_legacy_abac,
        logging_service: spec
            .logging_service
            .clone()
            .unwrap_or_else(|| "logging.googleapis.com".to_string()),
        monitoring_service: spec
            .monitoring_service
            .clone()
            .unwrap_or_else(|| "monitoring.googleapis.com".to_string()),
        network_policy: spec.network_policy.clone(),
        pod_security_policy: spec.pod_security_policy.clone(),
        node_pools,
        ..Default::default()
    }
}

fn observed_pool(spec: &NodePoolSpec, cluster_version: &str) -> ObservedNodePool {
    ObservedNodePool {
        status: ResourceStatus::Running,
        node_count: spec.node_count.unwrap_or(spec.initial_node_count),
        version: spec
            .version
            .clone()
            .unwrap_or_else(|| cluster_version.to_string()),
        autoscaling: spec.autoscaling.clone(),
        management: spec.management.clone(),
    }
}

fn apply_update(cluster: &mut ObservedCluster, update: ClusterUpdate) {
    match update {
        ClusterUpdate::MasterAuthorizedNetworks(networks) => {
            cluster.master_authorized_networks = networks
        }
        ClusterUpdate::MasterVersion(version) => cluster.master_version = version,
        ClusterUpdate::NodeVersion(version) => {
            for pool in cluster.node_pools.values_mut() {
                pool.version = version.clone();
            }
            cluster.node_version = version;
        }
        ClusterUpdate::Addons(addons) => cluster.addons = addons,
        ClusterUpdate::MaintenancePolicy(policy) => cluster.maintenance_policy = policy,
        ClusterUpdate::Locations(locations) => cluster.locations = locations,
        ClusterUpdate::LegacyAbac(enabled) => cluster.legacy_abac = enabled,
        ClusterUpdate::MonitoringService(service) => cluster.monitoring_service = service,
        ClusterUpdate::NetworkPolicy(policy) => cluster.network_policy = Some(policy),
        ClusterUpdate::LoggingService(service) => cluster.logging_service = service,
        ClusterUpdate::PodSecurityPolicy(psp) => cluster.pod_security_policy = Some(psp),
    }
}

fn apply_pool_update(pool: &mut ObservedNodePool, update: NodePoolUpdate) {
    match update {
        NodePoolUpdate::Version(version) => pool.version = version,
        NodePoolUpdate::Autoscaling(autoscaling) => pool.autoscaling = autoscaling,
        NodePoolUpdate::Size(count) => pool.node_count = count,
        NodePoolUpdate::Management(management) => pool.management = management,
    }
}

fn apply(state: &mut State, target: &ResourceIdentity, effect: Effect) {
    let key = target.lock_key();
    match effect {
        Effect::Create(request) => {
            state.clusters.insert(key, created_cluster(&request));
        }
        Effect::Delete => {
            state.clusters.remove(&key);
        }
        other => {
            let Some(cluster) = state.clusters.get_mut(&key) else {
                return;
            };
            match other {
                Effect::Update(update) => apply_update(cluster, update),
                Effect::CreatePool(name, spec) => {
                    let pool = observed_pool(&spec, &cluster.node_version);
                    cluster.node_pools.insert(name, pool);
                }
                Effect::DeletePool(name) => {
                    cluster.node_pools.remove(&name);
                }
                Effect::UpdatePool(name, update) => {
                    if let Some(pool) = cluster.node_pools.get_mut(&name) {
                        apply_pool_update(pool, update);
                    }
                }
                Effect::Create(_) | Effect::Delete => {}
            }
        }
    }
}

#[async_trait]
impl ContainerApi for FakeContainerApi {
    async fn create_cluster(
        &self,
        _version: ApiVersion,
        request: &CreateClusterRequest,
    ) -> Result<Operation> {
        self.record_call("create_cluster")?;
        if self.state().clusters.contains_key(&request.identity.lock_key()) {
            return Err(Error::remote("create_cluster", 409, "already exists"));
        }
        Ok(self.start(
            &request.identity,
            "create_cluster",
            Effect::Create(request.clone()),
        ))
    }

    async fn update_cluster(
        &self,
        _version: ApiVersion,
        identity: &ResourceIdentity,
        update: &ClusterUpdate,
    ) -> Result<Operation> {
        self.record_call("update_cluster")?;
        self.require_cluster(identity)?;
        Ok(self.start(identity, update.name(), Effect::Update(update.clone())))
    }

    async fn delete_cluster(
        &self,
        _version: ApiVersion,
        identity: &ResourceIdentity,
    ) -> Result<Operation> {
        self.record_call("delete_cluster")?;
        self.require_cluster(identity)?;
        Ok(self.start(identity, "delete_cluster", Effect::Delete))
    }

    async fn get_cluster(
        &self,
        _version: ApiVersion,
        identity: &ResourceIdentity,
    ) -> Result<ObservedCluster> {
        self.record_call("get_cluster")?;
        self.cluster(identity)
            .ok_or_else(|| Error::not_found(identity.full_name()))
    }

    async fn get_operation(
        &self,
        _version: ApiVersion,
        identity: &ResourceIdentity,
        operation_id: &str,
    ) -> Result<Operation> {
        self.record_call("get_operation")?;
        let end = self.tick();
        let polls_until_done = self.polls_until_done;

        let mut state = self.state();
        let Some(op) = state.operations.get_mut(operation_id) else {
            return Err(Error::not_found(format!(
                "{}/operations/{}",
                identity.parent_path(),
                operation_id
            )));
        };

        let mut operation = Operation::pending(operation_id, op.target.clone());
        operation.operation_type = op.call.clone();
        operation.status = ResourceStatus::Running;

        if !op.terminal {
            op.polls += 1;
            if op.polls < polls_until_done {
                return Ok(operation);
            }
            op.terminal = true;
            let target = op.target.clone();
            let window = op.window;
            let effect = op.effect.take();
            let failed = op.failed;

            state.windows[window].end = Some(end);
            if !failed {
                if let Some(effect) = effect {
                    apply(&mut state, &target, effect);
                }
            }
        }

        let op = &state.operations[operation_id];
        operation.status = ResourceStatus::Done;
        if op.failed {
            operation.error = Some(OperationError {
                code: Some(13),
                message: format!("{} failed on the control plane", op.call),
            });
        }
        Ok(operation)
    }

    async fn create_node_pool(
        &self,
        _version: ApiVersion,
        identity: &ResourceIdentity,
        pool_name: &str,
        spec: &NodePoolSpec,
    ) -> Result<Operation> {
        self.record_call("create_node_pool")?;
        self.require_cluster(identity)?;
        Ok(self.start(
            identity,
            "create_node_pool",
            Effect::CreatePool(pool_name.to_string(), spec.clone()),
        ))
    }

    async fn delete_node_pool(
        &self,
        _version: ApiVersion,
        identity: &ResourceIdentity,
        pool_name: &str,
    ) -> Result<Operation> {
        self.record_call("delete_node_pool")?;
        self.require_cluster(identity)?;
        Ok(self.start(
            identity,
            "delete_node_pool",
            Effect::DeletePool(pool_name.to_string()),
        ))
    }

    async fn update_node_pool(
        &self,
        _version: ApiVersion,
        identity: &ResourceIdentity,
        pool_name: &str,
        update: &NodePoolUpdate,
    ) -> Result<Operation> {
        self.record_call("update_node_pool")?;
        self.require_cluster(identity)?;
        Ok(self.start(
            identity,
            update.name(),
            Effect::UpdatePool(pool_name.to_string(), update.clone()),
        ))
    }
}
