//! Update planning
//!
//! The control plane accepts one change group per call. [`plan`] diffs the
//! desired spec against the observed cluster and emits the ordered list of
//! single-group [`UpdateStep`]s that converge them: parent groups first in a
//! fixed precedence, then each node pool's steps, one pool at a time in name
//! order.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::client::{ClusterUpdate, NodePoolUpdate};
use crate::model::{
    is_zone, ClusterSpec, KubeVersion, NodePoolSpec, ObservedCluster, ObservedNodePool,
};
use crate::{Error, Result, DEFAULT_NODE_POOL};

/// A group of fields the control plane changes in one call
///
/// Declaration order is precedence order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldGroup {
    /// Networks allowed to reach the master
    MasterAuthorizedNetworks,
    /// Master Kubernetes version
    MasterVersion,
    /// Node Kubernetes version
    NodeVersion,
    /// Add-on toggles
    Addons,
    /// Maintenance window
    MaintenancePolicy,
    /// Add zones (old and new together)
    LocationsExpand,
    /// Drop zones no longer wanted
    LocationsShrink,
    /// Legacy ABAC
    LegacyAbac,
    /// Monitoring service
    MonitoringService,
    /// Network policy enforcement
    NetworkPolicy,
    /// Logging service
    LoggingService,
    /// Pod security policy admission
    PodSecurityPolicy,
    /// Create a node pool
    NodePoolCreate,
    /// Delete a node pool
    NodePoolDelete,
    /// Upgrade a node pool
    NodePoolVersion,
    /// Node pool autoscaling bounds
    NodePoolAutoscaling,
    /// Fixed node pool size
    NodePoolSize,
    /// Node pool auto repair / auto upgrade
    NodePoolManagement,
}

impl FieldGroup {
    /// Position in the total precedence order
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// True for groups that change a Kubernetes version
    pub fn is_version_upgrade(&self) -> bool {
        matches!(
            self,
            FieldGroup::MasterVersion | FieldGroup::NodeVersion | FieldGroup::NodePoolVersion
        )
    }

    /// True for groups applied to the cluster itself rather than a pool
    pub fn is_master_level(&self) -> bool {
        *self < FieldGroup::NodePoolCreate
    }
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldGroup::MasterAuthorizedNetworks => "master_authorized_networks",
            FieldGroup::MasterVersion => "master_version",
            FieldGroup::NodeVersion => "node_version",
            FieldGroup::Addons => "addons",
            FieldGroup::MaintenancePolicy => "maintenance_policy",
            FieldGroup::LocationsExpand => "locations_expand",
            FieldGroup::LocationsShrink => "locations_shrink",
            FieldGroup::LegacyAbac => "legacy_abac",
            FieldGroup::MonitoringService => "monitoring_service",
            FieldGroup::NetworkPolicy => "network_policy",
            FieldGroup::LoggingService => "logging_service",
            FieldGroup::PodSecurityPolicy => "pod_security_policy",
            FieldGroup::NodePoolCreate => "node_pool_create",
            FieldGroup::NodePoolDelete => "node_pool_delete",
            FieldGroup::NodePoolVersion => "node_pool_version",
            FieldGroup::NodePoolAutoscaling => "node_pool_autoscaling",
            FieldGroup::NodePoolSize => "node_pool_size",
            FieldGroup::NodePoolManagement => "node_pool_management",
        };
        f.write_str(name)
    }
}

/// What a step acts on
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StepTarget {
    /// The cluster itself
    Cluster,
    /// One node pool, by name
    NodePool(String),
}

impl fmt::Display for StepTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepTarget::Cluster => f.write_str("cluster"),
            StepTarget::NodePool(name) => write!(f, "nodePool/{name}"),
        }
    }
}

/// The remote call a step makes
#[derive(Clone, Debug, PartialEq)]
pub enum StepChange {
    /// Update the cluster
    Cluster(ClusterUpdate),
    /// Create a pool
    CreateNodePool(NodePoolSpec),
    /// Delete a pool
    DeleteNodePool,
    /// Update a pool
    NodePool(NodePoolUpdate),
}

/// One atomic change: exactly one remote call, exactly one operation
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateStep {
    /// Which field group changes
    pub group: FieldGroup,
    /// Cluster or pool
    pub target: StepTarget,
    /// The call to make
    pub change: StepChange,
}

impl UpdateStep {
    fn cluster(group: FieldGroup, update: ClusterUpdate) -> Self {
        Self {
            group,
            target: StepTarget::Cluster,
            change: StepChange::Cluster(update),
        }
    }

    fn pool(group: FieldGroup, pool: &str, change: StepChange) -> Self {
        Self {
            group,
            target: StepTarget::NodePool(pool.to_string()),
            change,
        }
    }

    /// Precedence rank of the step's group
    pub fn rank(&self) -> u8 {
        self.group.rank()
    }

    /// Pool this step acts on, if any
    pub fn node_pool(&self) -> Option<&str> {
        match &self.target {
            StepTarget::Cluster => None,
            StepTarget::NodePool(name) => Some(name),
        }
    }

    /// Human-readable description used for waits and errors
    pub fn description(&self) -> String {
        match &self.target {
            StepTarget::Cluster => format!("updating {}", self.group),
            StepTarget::NodePool(name) => format!("{} on node pool {}", self.group, name),
        }
    }
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            StepTarget::Cluster => write!(f, "{}", self.group),
            StepTarget::NodePool(name) => write!(f, "{}[{}]", self.group, name),
        }
    }
}

/// Compute the ordered steps that move `observed` to `desired`
///
/// Validates first; an invalid spec yields [`Error::Validation`] and no steps.
/// Equal inputs yield an empty plan.
pub fn plan(desired: &ClusterSpec, observed: &ObservedCluster) -> Result<Vec<UpdateStep>> {
    desired.validate_update()?;
    desired.validate_zones(&observed.location)?;

    let mut steps = Vec::new();
    plan_cluster(desired, observed, &mut steps)?;
    plan_node_pools(desired, observed, &mut steps)?;

    debug_assert!(steps.windows(2).all(|w| {
        w[0].target != w[1].target || w[0].rank() < w[1].rank()
    }));
    Ok(steps)
}

fn plan_cluster(
    desired: &ClusterSpec,
    observed: &ObservedCluster,
    steps: &mut Vec<UpdateStep>,
) -> Result<()> {
    let desired_networks = desired
        .master_authorized_networks
        .as_ref()
        .map(|n| n.normalized());
    let observed_networks = observed
        .master_authorized_networks
        .as_ref()
        .map(|n| n.normalized());
    if desired_networks != observed_networks {
        steps.push(UpdateStep::cluster(
            FieldGroup::MasterAuthorizedNetworks,
            ClusterUpdate::MasterAuthorizedNetworks(desired.master_authorized_networks.clone()),
        ));
    }

    // The master only ever moves forward towards the minimum
    if let Some(min_master) = &desired.min_master_version {
        let wanted: KubeVersion = min_master.parse()?;
        let current = parse_observed(&observed.master_version, "master_version")?;
        if current.as_ref().map_or(true, |v| *v < wanted) {
            steps.push(UpdateStep::cluster(
                FieldGroup::MasterVersion,
                ClusterUpdate::MasterVersion(min_master.clone()),
            ));
        }
    }

    if let Some(node_version) = &desired.node_version {
        let wanted: KubeVersion = node_version.parse()?;
        let current = parse_observed(&observed.node_version, "node_version")?;
        if !current.as_ref().is_some_and(|v| wanted.is_satisfied_by(v)) {
            steps.push(UpdateStep::cluster(
                FieldGroup::NodeVersion,
                ClusterUpdate::NodeVersion(node_version.clone()),
            ));
        }
    }

    if let Some(addons) = &desired.addons {
        if *addons != observed.addons {
            steps.push(UpdateStep::cluster(
                FieldGroup::Addons,
                ClusterUpdate::Addons(addons.clone()),
            ));
        }
    }

    if desired.maintenance_policy != observed.maintenance_policy {
        steps.push(UpdateStep::cluster(
            FieldGroup::MaintenancePolicy,
            ClusterUpdate::MaintenancePolicy(desired.maintenance_policy.clone()),
        ));
    }

    plan_locations(desired, observed, steps);

    if desired.enable_legacy_abac != observed.legacy_abac {
        steps.push(UpdateStep::cluster(
            FieldGroup::LegacyAbac,
            ClusterUpdate::LegacyAbac(desired.enable_legacy_abac),
        ));
    }

    if let Some(service) = &desired.monitoring_service {
        if *service != observed.monitoring_service {
            steps.push(UpdateStep::cluster(
                FieldGroup::MonitoringService,
                ClusterUpdate::MonitoringService(service.clone()),
            ));
        }
    }

    if let Some(policy) = &desired.network_policy {
        if *policy != observed.network_policy.clone().unwrap_or_default() {
            steps.push(UpdateStep::cluster(
                FieldGroup::NetworkPolicy,
                ClusterUpdate::NetworkPolicy(policy.clone()),
            ));
        }
    }

    if let Some(service) = &desired.logging_service {
        if *service != observed.logging_service {
            steps.push(UpdateStep::cluster(
                FieldGroup::LoggingService,
                ClusterUpdate::LoggingService(service.clone()),
            ));
        }
    }

    if let Some(psp) = &desired.pod_security_policy {
        if *psp != observed.pod_security_policy.clone().unwrap_or_default() {
            steps.push(UpdateStep::cluster(
                FieldGroup::PodSecurityPolicy,
                ClusterUpdate::PodSecurityPolicy(psp.clone()),
            ));
        }
    }

    Ok(())
}

/// Zones cannot be added and removed in one call: first widen to the union of
/// old and new, then narrow to the final list if it differs
fn plan_locations(desired: &ClusterSpec, observed: &ObservedCluster, steps: &mut Vec<UpdateStep>) {
    let old_zones = observed.additional_zones();
    if old_zones == desired.additional_zones {
        return;
    }

    let location = &observed.location;
    let mut expanded: BTreeSet<String> = old_zones.union(&desired.additional_zones).cloned().collect();
    let mut target = desired.additional_zones.clone();
    if is_zone(location) {
        expanded.insert(location.clone());
        target.insert(location.clone());
    }

    let mut current = old_zones;
    if is_zone(location) {
        current.insert(location.clone());
    }

    if expanded != current {
        steps.push(UpdateStep::cluster(
            FieldGroup::LocationsExpand,
            ClusterUpdate::Locations(expanded.iter().cloned().collect()),
        ));
    }
    if target != expanded {
        steps.push(UpdateStep::cluster(
            FieldGroup::LocationsShrink,
            ClusterUpdate::Locations(target.into_iter().collect()),
        ));
    }
}

fn plan_node_pools(
    desired: &ClusterSpec,
    observed: &ObservedCluster,
    steps: &mut Vec<UpdateStep>,
) -> Result<()> {
    let names: BTreeSet<&String> = desired
        .node_pools
        .keys()
        .chain(observed.node_pools.keys())
        .collect();

    for name in names {
        match (desired.node_pools.get(name), observed.node_pools.get(name)) {
            (Some(spec), None) => steps.push(UpdateStep::pool(
                FieldGroup::NodePoolCreate,
                name,
                StepChange::CreateNodePool(spec.clone()),
            )),
            (None, Some(_)) => {
                if should_delete_pool(desired, name) {
                    steps.push(UpdateStep::pool(
                        FieldGroup::NodePoolDelete,
                        name,
                        StepChange::DeleteNodePool,
                    ));
                }
            }
            (Some(spec), Some(current)) => plan_pool_update(name, spec, current, steps)?,
            (None, None) => {}
        }
    }
    Ok(())
}

/// The auto-provisioned pool goes only on request; other unlisted pools go
/// only when the spec lists pools at all
fn should_delete_pool(desired: &ClusterSpec, name: &str) -> bool {
    if name == DEFAULT_NODE_POOL {
        desired.remove_default_node_pool
    } else {
        !desired.node_pools.is_empty()
    }
}

fn plan_pool_update(
    name: &str,
    spec: &NodePoolSpec,
    current: &ObservedNodePool,
    steps: &mut Vec<UpdateStep>,
) -> Result<()> {
    if let Some(version) = &spec.version {
        let wanted: KubeVersion = version.parse()?;
        let observed = parse_observed(&current.version, "node_pools.version")?;
        if !observed.as_ref().is_some_and(|v| wanted.is_satisfied_by(v)) {
            steps.push(UpdateStep::pool(
                FieldGroup::NodePoolVersion,
                name,
                StepChange::NodePool(NodePoolUpdate::Version(version.clone())),
            ));
        }
    }

    if spec.autoscaling != current.autoscaling {
        steps.push(UpdateStep::pool(
            FieldGroup::NodePoolAutoscaling,
            name,
            StepChange::NodePool(NodePoolUpdate::Autoscaling(spec.autoscaling.clone())),
        ));
    }

    // The autoscaler owns the size while it is on
    if spec.autoscaling.is_none() {
        if let Some(count) = spec.node_count {
            if count != current.node_count {
                steps.push(UpdateStep::pool(
                    FieldGroup::NodePoolSize,
                    name,
                    StepChange::NodePool(NodePoolUpdate::Size(count)),
                ));
            }
        }
    }

    if spec.management != current.management {
        steps.push(UpdateStep::pool(
            FieldGroup::NodePoolManagement,
            name,
            StepChange::NodePool(NodePoolUpdate::Management(spec.management.clone())),
        ));
    }
    Ok(())
}

/// An empty observed version means "not reported"
fn parse_observed(raw: &str, field: &str) -> Result<Option<KubeVersion>> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| Error::serialization(format!("unparseable observed {field} '{raw}'")))
}

/// Split a plan into the parent steps and one step list per pool
///
/// Pool lists keep plan order and each pool appears once.
pub fn split_by_target(steps: Vec<UpdateStep>) -> (Vec<UpdateStep>, Vec<(String, Vec<UpdateStep>)>) {
    let mut parent = Vec::new();
    let mut pools: Vec<(String, Vec<UpdateStep>)> = Vec::new();
    let mut seen = HashSet::new();

    for step in steps {
        match step.node_pool().map(str::to_string) {
            None => parent.push(step),
            Some(name) => {
                if seen.insert(name.clone()) {
                    pools.push((name, vec![step]));
                } else if let Some((_, list)) = pools.iter_mut().find(|(n, _)| *n == name) {
                    list.push(step);
                }
            }
        }
    }
    (parent, pools)
}

/// One-line rendering of a plan for logs
pub fn plan_summary(steps: &[UpdateStep]) -> String {
    if steps.is_empty() {
        return "no changes".to_string();
    }
    steps
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
