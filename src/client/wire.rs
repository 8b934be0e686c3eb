//! JSON shapes of the container REST API and their mapping to the model

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ClusterUpdate, CreateClusterRequest, NodePoolUpdate};
use crate::model::{
    AddonsConfig, CidrBlock, MaintenancePolicy, MasterAuthorizedNetworks, NetworkPolicy,
    NetworkPolicyProvider, NodeManagement, NodePoolAutoscaling, NodePoolSpec, ObservedCluster,
    ObservedNodePool, PodSecurityPolicyConfig, ResourceIdentity, ResourceStatus,
};
use crate::operation::{Operation, OperationError};

// =============================================================================
// Operations
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireOperation {
    pub name: String,
    #[serde(default)]
    pub operation_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub error: Option<WireStatus>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct WireStatus {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: String,
}

impl WireOperation {
    pub fn into_operation(self, target: &ResourceIdentity) -> Operation {
        let status = ResourceStatus::from_remote(&self.status);
        // Older API revisions report failures only through statusMessage
        let error = match self.error {
            Some(e) => Some(OperationError {
                code: e.code,
                message: e.message,
            }),
            None if status == ResourceStatus::Done && !self.status_message.is_empty() => {
                Some(OperationError {
                    code: None,
                    message: self.status_message,
                })
            }
            None => None,
        };
        Operation {
            id: self.name,
            target: target.clone(),
            operation_type: self.operation_type,
            status,
            error,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub(super) struct WireErrorBody {
    #[serde(default)]
    pub error: WireErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct WireErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

// =============================================================================
// Clusters
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Toggle {
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Enabled {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireAddons {
    #[serde(default)]
    pub http_load_balancing: Option<Toggle>,
    #[serde(default)]
    pub horizontal_pod_autoscaling: Option<Toggle>,
    #[serde(default)]
    pub kubernetes_dashboard: Option<Toggle>,
    #[serde(default)]
    pub network_policy_config: Option<Toggle>,
}

impl From<&AddonsConfig> for WireAddons {
    fn from(a: &AddonsConfig) -> Self {
        Self {
            http_load_balancing: Some(Toggle {
                disabled: a.http_load_balancing_disabled,
            }),
            horizontal_pod_autoscaling: Some(Toggle {
                disabled: a.horizontal_pod_autoscaling_disabled,
            }),
            kubernetes_dashboard: Some(Toggle {
                disabled: a.kubernetes_dashboard_disabled,
            }),
            network_policy_config: Some(Toggle {
                disabled: a.network_policy_config_disabled,
            }),
        }
    }
}

impl From<WireAddons> for AddonsConfig {
    fn from(w: WireAddons) -> Self {
        let defaults = AddonsConfig::default();
        Self {
            http_load_balancing_disabled: w
                .http_load_balancing
                .map_or(defaults.http_load_balancing_disabled, |t| t.disabled),
            horizontal_pod_autoscaling_disabled: w
                .horizontal_pod_autoscaling
                .map_or(defaults.horizontal_pod_autoscaling_disabled, |t| t.disabled),
            kubernetes_dashboard_disabled: w
                .kubernetes_dashboard
                .map_or(defaults.kubernetes_dashboard_disabled, |t| t.disabled),
            network_policy_config_disabled: w
                .network_policy_config
                .map_or(defaults.network_policy_config_disabled, |t| t.disabled),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireAuthorizedNetworks {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cidr_blocks: Vec<CidrBlock>,
}

fn authorized_networks_to_wire(n: Option<&MasterAuthorizedNetworks>) -> WireAuthorizedNetworks {
    match n {
        Some(n) => WireAuthorizedNetworks {
            enabled: true,
            cidr_blocks: n.cidr_blocks.clone(),
        },
        None => WireAuthorizedNetworks::default(),
    }
}

fn maintenance_to_wire(p: Option<&MaintenancePolicy>) -> Value {
    match p {
        Some(p) => json!({
            "window": { "dailyMaintenanceWindow": { "startTime": p.daily_window_start_time } }
        }),
        None => json!({}),
    }
}

fn maintenance_from_wire(v: Option<&Value>) -> Option<MaintenancePolicy> {
    v?.pointer("/window/dailyMaintenanceWindow/startTime")
        .and_then(Value::as_str)
        .map(|start| MaintenancePolicy {
            daily_window_start_time: start.to_string(),
        })
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireNetworkPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: NetworkPolicyProvider,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireAutoscaling {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_node_count: u32,
    #[serde(default)]
    pub max_node_count: u32,
}

fn autoscaling_to_wire(a: Option<&NodePoolAutoscaling>) -> WireAutoscaling {
    match a {
        Some(a) => WireAutoscaling {
            enabled: true,
            min_node_count: a.min_node_count,
            max_node_count: a.max_node_count,
        },
        None => WireAutoscaling::default(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireNodePool {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub initial_node_count: u32,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub autoscaling: Option<WireAutoscaling>,
    #[serde(default)]
    pub management: Option<NodeManagement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireCluster {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub current_master_version: String,
    #[serde(default)]
    pub current_node_version: String,
    #[serde(default)]
    pub master_authorized_networks_config: Option<WireAuthorizedNetworks>,
    #[serde(default)]
    pub addons_config: Option<WireAddons>,
    #[serde(default)]
    pub maintenance_policy: Option<Value>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub legacy_abac: Option<Enabled>,
    #[serde(default)]
    pub logging_service: String,
    #[serde(default)]
    pub monitoring_service: String,
    #[serde(default)]
    pub network_policy: Option<WireNetworkPolicy>,
    #[serde(default)]
    pub pod_security_policy_config: Option<Enabled>,
    #[serde(default)]
    pub node_pools: Vec<WireNodePool>,
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

impl From<WireCluster> for ObservedCluster {
    fn from(w: WireCluster) -> Self {
        let location = if w.location.is_empty() { w.zone } else { w.location };
        let node_pools: BTreeMap<String, ObservedNodePool> = w
            .node_pools
            .into_iter()
            .map(|p| {
                let pool = ObservedNodePool {
                    status: ResourceStatus::from_remote(&p.status),
                    node_count: p.initial_node_count,
                    version: p.version,
                    autoscaling: p.autoscaling.filter(|a| a.enabled).map(|a| {
                        NodePoolAutoscaling {
                            min_node_count: a.min_node_count,
                            max_node_count: a.max_node_count,
                        }
                    }),
                    management: p.management.unwrap_or_default(),
                };
                (p.name, pool)
            })
            .collect();

        Self {
            name: w.name,
            location,
            status: ResourceStatus::from_remote(&w.status),
            status_message: non_empty(w.status_message),
            endpoint: non_empty(w.endpoint),
            master_version: w.current_master_version,
            node_version: w.current_node_version,
            master_authorized_networks: w
                .master_authorized_networks_config
                .filter(|n| n.enabled)
                .map(|n| MasterAuthorizedNetworks {
                    cidr_blocks: n.cidr_blocks,
                }),
            addons: w.addons_config.map(AddonsConfig::from).unwrap_or_default(),
            maintenance_policy: maintenance_from_wire(w.maintenance_policy.as_ref()),
            locations: w.locations,
            legacy_abac: w.legacy_abac.is_some_and(|a| a.enabled),
            logging_service: w.logging_service,
            monitoring_service: w.monitoring_service,
            network_policy: w.network_policy.map(|n| NetworkPolicy {
                enabled: n.enabled,
                provider: n.provider,
            }),
            pod_security_policy: w
                .pod_security_policy_config
                .map(|p| PodSecurityPolicyConfig { enabled: p.enabled }),
            node_pools,
        }
    }
}

// =============================================================================
// Request bodies
// =============================================================================

/// `{"nodePool": {...}}` body member for one pool
pub(super) fn node_pool_body(name: &str, spec: &NodePoolSpec) -> Value {
    let mut config = json!({});
    if !spec.taints.is_empty() {
        config["taints"] = json!(spec.taints);
    }
    if let Some(mode) = &spec.workload_metadata {
        config["workloadMetadataConfig"] = json!({ "nodeMetadata": mode });
    }

    let mut pool = json!({
        "name": name,
        "initialNodeCount": spec.node_count.unwrap_or(spec.initial_node_count),
        "management": spec.management,
        "config": config,
    });
    if let Some(version) = &spec.version {
        pool["version"] = json!(version);
    }
    if spec.autoscaling.is_some() {
        pool["autoscaling"] = json!(autoscaling_to_wire(spec.autoscaling.as_ref()));
    }
    pool
}

/// Body of the single create call
pub(super) fn create_cluster_body(request: &CreateClusterRequest) -> Value {
    let spec = &request.spec;
    let addons = WireAddons::from(&spec.addons.clone().unwrap_or_default());
    let networks = authorized_networks_to_wire(spec.master_authorized_networks.as_ref());
    let mut cluster = json!({
        "name": spec.name,
        "addonsConfig": addons,
        "masterAuthorizedNetworksConfig": networks,
        "legacyAbac": { "enabled": spec.enable_legacy_abac },
        "enableKubernetesAlpha": spec.enable_kubernetes_alpha,
    });

    let optional = [
        ("description", spec.description.clone()),
        ("initialClusterVersion", spec.min_master_version.clone()),
        ("loggingService", spec.logging_service.clone()),
        ("monitoringService", spec.monitoring_service.clone()),
        ("network", spec.network.clone()),
        ("subnetwork", spec.subnetwork.clone()),
        ("clusterIpv4Cidr", spec.cluster_ipv4_cidr.clone()),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            cluster[key] = json!(value);
        }
    }

    if !request.locations.is_empty() {
        cluster["locations"] = json!(request.locations);
    }
    if spec.maintenance_policy.is_some() {
        cluster["maintenancePolicy"] = maintenance_to_wire(spec.maintenance_policy.as_ref());
    }
    if let Some(policy) = &spec.network_policy {
        let policy = WireNetworkPolicy {
            enabled: policy.enabled,
            provider: policy.provider,
        };
        cluster["networkPolicy"] = json!(policy);
    }
    if let Some(psp) = &spec.pod_security_policy {
        cluster["podSecurityPolicyConfig"] = json!({ "enabled": psp.enabled });
    }
    if let Some(ip) = &spec.ip_allocation_policy {
        cluster["ipAllocationPolicy"] = json!({
            "useIpAliases": true,
            "clusterSecondaryRangeName": ip.cluster_secondary_range_name,
            "servicesSecondaryRangeName": ip.services_secondary_range_name,
        });
    }
    if spec.private_cluster {
        cluster["privateCluster"] = json!(true);
    }
    if let Some(cidr) = &spec.master_ipv4_cidr_block {
        cluster["masterIpv4CidrBlock"] = json!(cidr);
    }

    if spec.node_pools.is_empty() {
        cluster["initialNodeCount"] = json!(spec.initial_node_count);
    } else {
        cluster["nodePools"] = Value::Array(
            spec.node_pools
                .iter()
                .map(|(name, pool)| node_pool_body(name, pool))
                .collect(),
        );
    }

    json!({ "cluster": cluster })
}

/// How a cluster update is sent: the verb suffix (None for the generic PUT)
/// and the JSON body
pub(super) fn cluster_update_request(update: &ClusterUpdate) -> (Option<&'static str>, Value) {
    match update {
        ClusterUpdate::MasterAuthorizedNetworks(n) => (
            None,
            json!({ "update": {
                "desiredMasterAuthorizedNetworksConfig": authorized_networks_to_wire(n.as_ref())
            }}),
        ),
        ClusterUpdate::MasterVersion(v) => (
            Some("updateMaster"),
            json!({ "masterVersion": v }),
        ),
        ClusterUpdate::NodeVersion(v) => (
            None,
            json!({ "update": { "desiredNodeVersion": v, "desiredNodePoolId": "-" } }),
        ),
        ClusterUpdate::Addons(a) => (
            Some("setAddons"),
            json!({ "addonsConfig": WireAddons::from(a) }),
        ),
        ClusterUpdate::MaintenancePolicy(p) => (
            Some("setMaintenancePolicy"),
            json!({ "maintenancePolicy": maintenance_to_wire(p.as_ref()) }),
        ),
        ClusterUpdate::Locations(l) => (Some("setLocations"), json!({ "locations": l })),
        ClusterUpdate::LegacyAbac(enabled) => {
            (Some("setLegacyAbac"), json!({ "enabled": enabled }))
        }
        ClusterUpdate::MonitoringService(s) => {
            (Some("setMonitoring"), json!({ "monitoringService": s }))
        }
        ClusterUpdate::NetworkPolicy(p) => {
            let policy = WireNetworkPolicy {
                enabled: p.enabled,
                provider: p.provider,
            };
            (Some("setNetworkPolicy"), json!({ "networkPolicy": policy }))
        }
        ClusterUpdate::LoggingService(s) => (Some("setLogging"), json!({ "loggingService": s })),
        ClusterUpdate::PodSecurityPolicy(p) => (
            None,
            json!({ "update": {
                "desiredPodSecurityPolicyConfig": { "enabled": p.enabled }
            }}),
        ),
    }
}

/// Same as [`cluster_update_request`] for node pools
pub(super) fn node_pool_update_request(update: &NodePoolUpdate) -> (Option<&'static str>, Value) {
    match update {
        NodePoolUpdate::Version(v) => (None, json!({ "nodeVersion": v })),
        NodePoolUpdate::Autoscaling(a) => (
            Some("setAutoscaling"),
            json!({ "autoscaling": autoscaling_to_wire(a.as_ref()) }),
        ),
        NodePoolUpdate::Size(n) => (Some("setSize"), json!({ "nodeCount": n })),
        NodePoolUpdate::Management(m) => (Some("setManagement"), json!({ "management": m })),
    }
}
