//! Desired and observed cluster state

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::identity::{is_zone, ResourceIdentity};
use super::types::{
    AddonsConfig, IpAllocationPolicy, MaintenancePolicy, MasterAuthorizedNetworks, NetworkPolicy,
    NodeManagement, NodePoolAutoscaling, NodeTaint, PodSecurityPolicyConfig, ResourceStatus,
};
use super::version::KubeVersion;
use crate::{Error, Result};

/// Maximum number of master authorized network blocks the control plane accepts
pub const MAX_AUTHORIZED_NETWORKS: usize = 10;

/// Everything the caller wants a cluster to be
///
/// Supplied fresh on every call, never persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster name
    pub name: String,

    /// Free-form description (create only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Node count of the auto-provisioned default pool (create only)
    #[serde(default)]
    pub initial_node_count: u32,

    /// Minimum master version; the master is only ever upgraded towards it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_master_version: Option<String>,

    /// Version for the cluster's nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_version: Option<String>,

    /// Networks allowed to reach the master; None disables the restriction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_authorized_networks: Option<MasterAuthorizedNetworks>,

    /// Add-on toggles; None leaves add-ons untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addons: Option<AddonsConfig>,

    /// Daily maintenance window; None clears it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_policy: Option<MaintenancePolicy>,

    /// Zones in addition to the cluster's own zone
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub additional_zones: BTreeSet<String>,

    /// Legacy attribute-based access control
    #[serde(default)]
    pub enable_legacy_abac: bool,

    /// Alpha Kubernetes features (create only)
    #[serde(default)]
    pub enable_kubernetes_alpha: bool,

    /// Logging service; None leaves it untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging_service: Option<String>,

    /// Monitoring service; None leaves it untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_service: Option<String>,

    /// Network policy enforcement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_policy: Option<NetworkPolicy>,

    /// Pod security policy admission (beta)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_security_policy: Option<PodSecurityPolicyConfig>,

    /// Nodes without public IPs (beta, create only)
    #[serde(default)]
    pub private_cluster: bool,

    /// Master's private range, required for private clusters (beta, create only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_ipv4_cidr_block: Option<String>,

    /// Alias IP configuration (create only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_allocation_policy: Option<IpAllocationPolicy>,

    /// VPC network (create only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Subnetwork (create only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnetwork: Option<String>,

    /// Pod address range (create only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ipv4_cidr: Option<String>,

    /// Node pools keyed by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_pools: BTreeMap<String, NodePoolSpec>,

    /// Delete the auto-provisioned default pool
    #[serde(default)]
    pub remove_default_node_pool: bool,
}

/// Desired state of one node pool
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Node count at creation
    #[serde(default)]
    pub initial_node_count: u32,

    /// Fixed node count; ignored while autoscaling is on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_count: Option<u32>,

    /// Kubernetes version of the pool's nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Autoscaling bounds; None disables autoscaling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<NodePoolAutoscaling>,

    /// Auto repair / auto upgrade
    #[serde(default)]
    pub management: NodeManagement,

    /// Taints on every node (beta, create only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<NodeTaint>,

    /// Workload metadata exposure mode (beta, create only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_metadata: Option<String>,
}

impl NodePoolSpec {
    /// Validate one pool's settings
    pub fn validate(&self, cluster: &str, pool: &str) -> Result<()> {
        if let Some(scaling) = &self.autoscaling {
            if scaling.min_node_count > scaling.max_node_count {
                return Err(Error::validation_for_field(
                    cluster,
                    format!("node_pools.{pool}.autoscaling"),
                    format!(
                        "min_node_count ({}) must not exceed max_node_count ({})",
                        scaling.min_node_count, scaling.max_node_count
                    ),
                ));
            }
        }
        if let Some(version) = &self.version {
            version.parse::<KubeVersion>().map_err(|_| {
                Error::validation_for_field(
                    cluster,
                    format!("node_pools.{pool}.version"),
                    format!("invalid version '{version}'"),
                )
            })?;
        }
        Ok(())
    }

    /// True when any beta-only field is set
    pub fn uses_beta_features(&self) -> bool {
        !self.taints.is_empty() || self.workload_metadata.is_some()
    }
}

impl ClusterSpec {
    /// Validate cross-field preconditions that hold for any change
    ///
    /// Runs before any remote call; a failure means nothing was sent.
    pub fn validate_update(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation("cluster name must not be empty"));
        }

        if let Some(networks) = &self.master_authorized_networks {
            if networks.cidr_blocks.len() > MAX_AUTHORIZED_NETWORKS {
                return Err(Error::validation_for_field(
                    &self.name,
                    "master_authorized_networks",
                    format!(
                        "at most {} cidr blocks are allowed, got {}",
                        MAX_AUTHORIZED_NETWORKS,
                        networks.cidr_blocks.len()
                    ),
                ));
            }
        }

        // Enforcement needs the network policy add-on running
        if self.network_policy.as_ref().is_some_and(|np| np.enabled) {
            let addon_disabled = self
                .addons
                .as_ref()
                .map_or(true, |a| a.network_policy_config_disabled);
            if addon_disabled {
                return Err(Error::validation_for_field(
                    &self.name,
                    "network_policy",
                    "network_policy requires addons.networkPolicyConfigDisabled=false",
                ));
            }
        }

        if self.private_cluster {
            if self.master_ipv4_cidr_block.is_none() {
                return Err(Error::validation_for_field(
                    &self.name,
                    "master_ipv4_cidr_block",
                    "master_ipv4_cidr_block is mandatory when private_cluster=true",
                ));
            }
            if self.ip_allocation_policy.is_none() {
                return Err(Error::validation_for_field(
                    &self.name,
                    "ip_allocation_policy",
                    "ip_allocation_policy is mandatory when private_cluster=true",
                ));
            }
        }

        for field in [&self.min_master_version, &self.node_version]
            .into_iter()
            .flatten()
        {
            field.parse::<KubeVersion>().map_err(|_| {
                Error::validation_for(&self.name, format!("invalid version '{field}'"))
            })?;
        }

        for (pool, spec) in &self.node_pools {
            spec.validate(&self.name, pool)?;
        }

        Ok(())
    }

    /// Validate everything [`validate_update`](Self::validate_update) does plus
    /// the rules that only apply when creating
    pub fn validate_create(&self, identity: &ResourceIdentity) -> Result<()> {
        self.validate_update()?;

        if identity.name != self.name {
            return Err(Error::validation_for(
                &self.name,
                format!(
                    "spec name '{}' does not match identity name '{}'",
                    self.name, identity.name
                ),
            ));
        }

        // Initial versions only accept master-style values
        if let Some(node_version) = &self.node_version {
            let master = self
                .min_master_version
                .as_deref()
                .map(|v| v.split('-').next().unwrap_or(v));
            let node = node_version.split('-').next().unwrap_or(node_version);
            if master != Some(node) {
                return Err(Error::validation_for_field(
                    &self.name,
                    "node_version",
                    "node_version and min_master_version must be set to equivalent values on create",
                ));
            }
        }

        self.validate_zones(&identity.location)?;

        if self.initial_node_count == 0 && self.node_pools.is_empty() {
            return Err(Error::validation_for_field(
                &self.name,
                "initial_node_count",
                "either initial_node_count or node_pools must be set",
            ));
        }

        Ok(())
    }

    /// Additional zones must not repeat the cluster's own zone
    pub fn validate_zones(&self, location: &str) -> Result<()> {
        if self.additional_zones.contains(location) {
            return Err(Error::validation_for_field(
                &self.name,
                "additional_zones",
                "additional_zones should not contain the original 'zone'",
            ));
        }
        Ok(())
    }

    /// Full location list the control plane expects: the cluster's own zone
    /// plus the additional ones
    pub fn all_locations(&self, location: &str) -> Vec<String> {
        let mut zones = self.additional_zones.clone();
        if is_zone(location) && !zones.is_empty() {
            zones.insert(location.to_string());
        }
        zones.into_iter().collect()
    }

    /// Names of the beta-only features this spec requests
    pub fn beta_features(&self) -> Vec<&'static str> {
        let mut features = Vec::new();
        if self.pod_security_policy.is_some() {
            features.push("pod_security_policy");
        }
        if self.private_cluster {
            features.push("private_cluster");
        }
        if self.master_ipv4_cidr_block.is_some() {
            features.push("master_ipv4_cidr_block");
        }
        if self.node_pools.values().any(|p| !p.taints.is_empty()) {
            features.push("node_config.taint");
        }
        if self
            .node_pools
            .values()
            .any(|p| p.workload_metadata.is_some())
        {
            features.push("node_config.workload_metadata_config");
        }
        features
    }
}

/// A cluster spec file: where the cluster lives plus what it should be
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManifest {
    /// Owning project; falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Zone or region
    pub location: String,

    /// Desired state
    #[serde(flatten)]
    pub spec: ClusterSpec,
}

impl ClusterManifest {
    /// Parse a manifest from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Identity this manifest addresses
    pub fn identity(&self, default_project: Option<&str>) -> Result<ResourceIdentity> {
        let project = self
            .project
            .as_deref()
            .or(default_project)
            .ok_or_else(|| {
                Error::validation_for(&self.spec.name, "no project given and no default project")
            })?;
        Ok(ResourceIdentity::new(
            project,
            &self.location,
            &self.spec.name,
        ))
    }
}

/// Most recently fetched actual state of a cluster
///
/// May be stale the moment it is read; nothing gates mutation on it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedCluster {
    /// Cluster name
    pub name: String,
    /// Zone or region
    pub location: String,
    /// Lifecycle status
    pub status: ResourceStatus,
    /// Human-readable detail for the status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Master endpoint IP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Version the master runs
    #[serde(default)]
    pub master_version: String,
    /// Version the nodes run
    #[serde(default)]
    pub node_version: String,
    /// Master authorized networks, None when disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_authorized_networks: Option<MasterAuthorizedNetworks>,
    /// Add-on state
    #[serde(default)]
    pub addons: AddonsConfig,
    /// Maintenance window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_policy: Option<MaintenancePolicy>,
    /// Every zone the cluster spans, including its own
    #[serde(default)]
    pub locations: Vec<String>,
    /// Legacy ABAC state
    #[serde(default)]
    pub legacy_abac: bool,
    /// Logging service
    #[serde(default)]
    pub logging_service: String,
    /// Monitoring service
    #[serde(default)]
    pub monitoring_service: String,
    /// Network policy enforcement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_policy: Option<NetworkPolicy>,
    /// Pod security policy admission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_security_policy: Option<PodSecurityPolicyConfig>,
    /// Node pools keyed by name
    #[serde(default)]
    pub node_pools: BTreeMap<String, ObservedNodePool>,
}

impl ObservedCluster {
    /// Zones other than the cluster's own
    pub fn additional_zones(&self) -> BTreeSet<String> {
        self.locations
            .iter()
            .filter(|z| **z != self.location)
            .cloned()
            .collect()
    }
}

/// Actual state of one node pool
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedNodePool {
    /// Lifecycle status
    pub status: ResourceStatus,
    /// Current node count
    #[serde(default)]
    pub node_count: u32,
    /// Version the pool's nodes run
    #[serde(default)]
    pub version: String,
    /// Autoscaling bounds, None when disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<NodePoolAutoscaling>,
    /// Auto repair / auto upgrade
    #[serde(default)]
    pub management: NodeManagement,
}
