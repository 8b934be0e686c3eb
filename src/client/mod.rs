//! Remote control-plane contract
//!
//! [`ContainerApi`] is the seam between the engine and the control plane. Every
//! mutating call returns an [`Operation`] handle; the caller waits on it with
//! the [`OperationPoller`](crate::operation::OperationPoller).

mod http;
mod wire;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::model::{
    AddonsConfig, ClusterSpec, MaintenancePolicy, MasterAuthorizedNetworks,
    NetworkPolicy, NodeManagement, NodePoolAutoscaling, NodePoolSpec, ObservedCluster,
    PodSecurityPolicyConfig, ResourceIdentity,
};
use crate::operation::Operation;
use crate::Result;

pub use http::HttpContainerApi;

/// Which control-plane API surface a call goes to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiVersion {
    /// Stable API
    #[default]
    V1,
    /// Beta API, needed for beta-only features
    V1Beta1,
}

impl ApiVersion {
    /// Path segment for this version
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V1Beta1 => "v1beta1",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the API surface for a whole call sequence
///
/// Any beta-only feature in the spec forces the beta API for every call, so a
/// sequence never mixes surfaces.
pub fn select_api_version(spec: &ClusterSpec) -> ApiVersion {
    if spec.beta_features().is_empty() {
        ApiVersion::V1
    } else {
        ApiVersion::V1Beta1
    }
}

/// One change group applied to the cluster in a single remote call
#[derive(Clone, Debug, PartialEq)]
pub enum ClusterUpdate {
    /// Replace the master authorized networks (None disables them)
    MasterAuthorizedNetworks(Option<MasterAuthorizedNetworks>),
    /// Upgrade the master
    MasterVersion(String),
    /// Upgrade the nodes of every pool that tracks the cluster version
    NodeVersion(String),
    /// Replace add-on toggles
    Addons(AddonsConfig),
    /// Replace or clear the maintenance window
    MaintenancePolicy(Option<MaintenancePolicy>),
    /// Replace the zone list
    Locations(Vec<String>),
    /// Toggle legacy ABAC
    LegacyAbac(bool),
    /// Switch monitoring service
    MonitoringService(String),
    /// Replace network policy enforcement
    NetworkPolicy(NetworkPolicy),
    /// Switch logging service
    LoggingService(String),
    /// Toggle pod security policy admission
    PodSecurityPolicy(PodSecurityPolicyConfig),
}

impl ClusterUpdate {
    /// Short name used for logging and request naming
    pub fn name(&self) -> &'static str {
        match self {
            ClusterUpdate::MasterAuthorizedNetworks(_) => "master_authorized_networks",
            ClusterUpdate::MasterVersion(_) => "master_version",
            ClusterUpdate::NodeVersion(_) => "node_version",
            ClusterUpdate::Addons(_) => "addons",
            ClusterUpdate::MaintenancePolicy(_) => "maintenance_policy",
            ClusterUpdate::Locations(_) => "locations",
            ClusterUpdate::LegacyAbac(_) => "legacy_abac",
            ClusterUpdate::MonitoringService(_) => "monitoring_service",
            ClusterUpdate::NetworkPolicy(_) => "network_policy",
            ClusterUpdate::LoggingService(_) => "logging_service",
            ClusterUpdate::PodSecurityPolicy(_) => "pod_security_policy",
        }
    }
}

/// One change group applied to a node pool in a single remote call
#[derive(Clone, Debug, PartialEq)]
pub enum NodePoolUpdate {
    /// Upgrade the pool's nodes
    Version(String),
    /// Replace autoscaling bounds (None disables autoscaling)
    Autoscaling(Option<NodePoolAutoscaling>),
    /// Resize to a fixed node count
    Size(u32),
    /// Replace auto repair / auto upgrade
    Management(NodeManagement),
}

impl NodePoolUpdate {
    /// Short name used for logging and request naming
    pub fn name(&self) -> &'static str {
        match self {
            NodePoolUpdate::Version(_) => "node_pool_version",
            NodePoolUpdate::Autoscaling(_) => "node_pool_autoscaling",
            NodePoolUpdate::Size(_) => "node_pool_size",
            NodePoolUpdate::Management(_) => "node_pool_management",
        }
    }
}

/// Everything sent in the single create call
#[derive(Clone, Debug, PartialEq)]
pub struct CreateClusterRequest {
    /// Where the cluster goes
    pub identity: ResourceIdentity,
    /// Every zone, own zone included; empty for a single-zone cluster
    pub locations: Vec<String>,
    /// Desired state at creation
    pub spec: ClusterSpec,
}

impl CreateClusterRequest {
    /// Build the request for a validated spec
    pub fn from_spec(identity: &ResourceIdentity, spec: &ClusterSpec) -> Self {
        Self {
            identity: identity.clone(),
            locations: spec.all_locations(&identity.location),
            spec: spec.clone(),
        }
    }
}

/// Trait abstracting the container control plane
///
/// This trait allows mocking the control plane in tests while using the real
/// HTTP client in production. Every method takes the API version chosen once
/// for the surrounding sequence.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContainerApi: Send + Sync {
    /// Start creating a cluster
    async fn create_cluster(
        &self,
        version: ApiVersion,
        request: &CreateClusterRequest,
    ) -> Result<Operation>;

    /// Apply one change group to a cluster
    async fn update_cluster(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
        update: &ClusterUpdate,
    ) -> Result<Operation>;

    /// Start deleting a cluster
    async fn delete_cluster(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
    ) -> Result<Operation>;

    /// Fetch a cluster's observed state
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) when it does not exist.
    async fn get_cluster(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
    ) -> Result<ObservedCluster>;

    /// Fetch an operation's current status
    async fn get_operation(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
        operation_id: &str,
    ) -> Result<Operation>;

    /// Start creating a node pool
    async fn create_node_pool(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
        pool_name: &str,
        pool: &NodePoolSpec,
    ) -> Result<Operation>;

    /// Start deleting a node pool
    async fn delete_node_pool(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
        pool_name: &str,
    ) -> Result<Operation>;

    /// Apply one change group to a node pool
    async fn update_node_pool(
        &self,
        version: ApiVersion,
        identity: &ResourceIdentity,
        pool_name: &str,
        update: &NodePoolUpdate,
    ) -> Result<Operation>;
}
