//! Supporting types shared by desired and observed cluster state

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a cluster, node pool or operation
///
/// The control plane reports richer status strings; they are folded onto this
/// enum by [`ResourceStatus::from_remote`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    /// Work has been accepted but not started, or is being reconciled
    #[default]
    Pending,
    /// In progress (operations) or serving (clusters and pools)
    Running,
    /// Finished
    Done,
    /// Broken
    Error,
}

impl ResourceStatus {
    /// Map a remote status string onto the lifecycle enum
    pub fn from_remote(status: &str) -> Self {
        match status {
            "RUNNING" => Self::Running,
            "DONE" => Self::Done,
            "ERROR" | "DEGRADED" => Self::Error,
            // PROVISIONING, RECONCILING, STOPPING, PENDING, ABORTING, unknown
            _ => Self::Pending,
        }
    }

    /// True for a cluster or pool that can accept its next change
    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Running | Self::Done)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Done => write!(f, "DONE"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// A CIDR block allowed to reach the master
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CidrBlock {
    /// Network in CIDR notation
    pub cidr_block: String,
    /// Optional label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Master authorized networks; present means enabled
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterAuthorizedNetworks {
    /// Allowed blocks (at most 10)
    #[serde(default)]
    pub cidr_blocks: Vec<CidrBlock>,
}

impl MasterAuthorizedNetworks {
    /// Blocks in a canonical order, so ordering differences are not changes
    pub fn normalized(&self) -> Self {
        let mut cidr_blocks = self.cidr_blocks.clone();
        cidr_blocks.sort();
        cidr_blocks.dedup();
        Self { cidr_blocks }
    }
}

/// Cluster add-ons
///
/// Everything is enabled by default except network policy enforcement, which
/// the control plane leaves off until asked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonsConfig {
    /// Disable the HTTP load balancing controller
    #[serde(default)]
    pub http_load_balancing_disabled: bool,
    /// Disable horizontal pod autoscaling
    #[serde(default)]
    pub horizontal_pod_autoscaling_disabled: bool,
    /// Disable the kubernetes dashboard
    #[serde(default)]
    pub kubernetes_dashboard_disabled: bool,
    /// Disable the network policy enforcement add-on
    #[serde(default = "default_true")]
    pub network_policy_config_disabled: bool,
}

impl Default for AddonsConfig {
    fn default() -> Self {
        Self {
            http_load_balancing_disabled: false,
            horizontal_pod_autoscaling_disabled: false,
            kubernetes_dashboard_disabled: false,
            network_policy_config_disabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Maintenance window
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenancePolicy {
    /// Start of the daily window, `HH:MM` in UTC
    pub daily_window_start_time: String,
}

/// Network policy provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkPolicyProvider {
    /// Unspecified
    #[default]
    ProviderUnspecified,
    /// Tigera Calico
    Calico,
}

/// Network policy enforcement
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicy {
    /// Whether enforcement is on
    #[serde(default)]
    pub enabled: bool,
    /// Which provider enforces it
    #[serde(default)]
    pub provider: NetworkPolicyProvider,
}

/// Pod security policy admission (beta API only)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSecurityPolicyConfig {
    /// Whether the admission controller is on
    #[serde(default)]
    pub enabled: bool,
}

/// Alias IP ranges for pods and services
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAllocationPolicy {
    /// Secondary range for pod IPs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_secondary_range_name: Option<String>,
    /// Secondary range for service IPs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services_secondary_range_name: Option<String>,
}

/// Node pool autoscaling bounds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolAutoscaling {
    /// Minimum node count
    pub min_node_count: u32,
    /// Maximum node count
    pub max_node_count: u32,
}

/// Node auto-repair and auto-upgrade
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeManagement {
    /// Recreate unhealthy nodes
    #[serde(default)]
    pub auto_repair: bool,
    /// Follow master upgrades
    #[serde(default)]
    pub auto_upgrade: bool,
}

/// A Kubernetes taint applied to every node in a pool (beta API only)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTaint {
    /// Taint key
    pub key: String,
    /// Taint value
    pub value: String,
    /// NO_SCHEDULE, PREFER_NO_SCHEDULE or NO_EXECUTE
    pub effect: String,
}
