//! Stories about how callers converge clusters through the reconciler
//!
//! # Test Organization
//!
//! - `fake`: the in-memory control plane every story runs against
//! - `create`: creating clusters, failed creates, default pool removal
//! - `update`: planned multi-step updates, partial failure, idempotence
//! - `delete`: deleting busy and missing clusters
//! - `concurrency`: serialization of sequences on one cluster, parallelism
//!   across clusters

mod create;
mod fake;
mod update;

use std::sync::Arc;
use std::time::Duration;

use clusterops::config::ReconcilerConfig;
use clusterops::controller::Reconciler;
use clusterops::lock::ResourceKeyLock;
use clusterops::model::{ClusterSpec, ResourceIdentity};
use clusterops::retry::RetryConfig;

use fake::FakeContainerApi;

/// Fast budgets; tests run with tokio's clock paused
pub fn test_config() -> ReconcilerConfig {
    ReconcilerConfig {
        poll_interval: Duration::from_secs(1),
        update_timeout: Duration::from_secs(60),
        create_timeout: Duration::from_secs(120),
        delete_timeout: Duration::from_secs(60),
        poll_retry: RetryConfig::fixed(3, Duration::from_millis(100)),
        dispatch_retry: RetryConfig::fixed(3, Duration::from_millis(100)),
        delete_retry: RetryConfig::fixed(15, Duration::from_millis(500))
            .with_max_elapsed(Duration::from_secs(30)),
        ..Default::default()
    }
}

/// Reconciler over `api` with its own lock table
pub fn reconciler(api: Arc<FakeContainerApi>) -> Reconciler {
    Reconciler::new(api, test_config()).with_locks(Arc::new(ResourceKeyLock::new()))
}

pub fn identity(name: &str) -> ResourceIdentity {
    ResourceIdentity::new("acme", "us-central1-a", name)
}

/// A minimal valid spec for a new cluster on 1.1
pub fn base_spec(name: &str) -> ClusterSpec {
    ClusterSpec {
        name: name.to_string(),
        initial_node_count: 3,
        min_master_version: Some("1.1.0".to_string()),
        node_version: Some("1.1.0".to_string()),
        ..Default::default()
    }
}
