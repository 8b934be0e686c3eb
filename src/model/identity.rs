//! Cluster identity

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Stable key addressing one remote cluster: `{project, location, name}`
///
/// Also the lock key. Immutable once the cluster exists and reused across
/// create, update and delete.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// Project that owns the cluster
    pub project: String,
    /// Zone or region
    pub location: String,
    /// Cluster name
    pub name: String,
}

impl ResourceIdentity {
    /// Create an identity from its three parts
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            location: location.into(),
            name: name.into(),
        }
    }

    /// Parse `{project}/{location}/{name}` or `{location}/{name}`
    ///
    /// The two-part form takes its project from `default_project`.
    pub fn parse(id: &str, default_project: Option<&str>) -> Result<Self> {
        let parts: Vec<&str> = id.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::validation(format!(
                "invalid cluster specifier '{id}': empty segment"
            )));
        }
        match parts.as_slice() {
            [project, location, name] => Ok(Self::new(*project, *location, *name)),
            [location, name] => {
                let project = default_project.ok_or_else(|| {
                    Error::validation(format!(
                        "cluster specifier '{id}' has no project and no default project is configured"
                    ))
                })?;
                Ok(Self::new(project, *location, *name))
            }
            _ => Err(Error::validation(format!(
                "invalid cluster specifier '{id}': expecting {{location}}/{{name}} or {{project}}/{{location}}/{{name}}"
            ))),
        }
    }

    /// Key used in the process-wide lock table
    pub fn lock_key(&self) -> String {
        format!(
            "container-cluster/{}/{}/{}",
            self.project, self.location, self.name
        )
    }

    /// `projects/{p}/locations/{l}` - the collection clusters are created in
    pub fn parent_path(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.location)
    }

    /// `projects/{p}/locations/{l}/clusters/{n}`
    pub fn full_name(&self) -> String {
        format!("{}/clusters/{}", self.parent_path(), self.name)
    }

    /// `projects/{p}/locations/{l}/clusters/{n}/nodePools/{pool}`
    pub fn node_pool_path(&self, pool: &str) -> String {
        format!("{}/nodePools/{}", self.full_name(), pool)
    }

    /// True when the location names a zone rather than a region
    pub fn is_zonal(&self) -> bool {
        is_zone(&self.location)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.location, self.name)
    }
}

/// Zones look like `us-central1-a`; regions like `us-central1`
pub fn is_zone(location: &str) -> bool {
    location.split('-').count() == 3
}
