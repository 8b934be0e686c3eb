//! Cluster data model
//!
//! Identity, the caller's desired spec, and the control plane's observed state.

mod cluster;
mod identity;
mod types;
mod version;

pub use cluster::{
    ClusterManifest, ClusterSpec, NodePoolSpec, ObservedCluster, ObservedNodePool,
    MAX_AUTHORIZED_NETWORKS,
};
pub use identity::{is_zone, ResourceIdentity};
pub use types::{
    AddonsConfig, CidrBlock, IpAllocationPolicy, MaintenancePolicy, MasterAuthorizedNetworks,
    NetworkPolicy, NetworkPolicyProvider, NodeManagement, NodePoolAutoscaling, NodeTaint,
    PodSecurityPolicyConfig, ResourceStatus,
};
pub use version::KubeVersion;
