//! clusterops - operation orchestration for remotely provisioned container clusters
//!
//! A cluster is a parent resource plus nested node pools. The control plane
//! executes every mutation asynchronously and accepts only one change group per
//! call, so converging a cluster means issuing an ordered sequence of single-group
//! calls, waiting for each long-running operation, and serializing everything
//! that touches the same cluster.
//!
//! # Modules
//!
//! - [`model`] - Cluster identity, desired spec and observed state
//! - [`client`] - Remote control-plane contract and its HTTP implementation
//! - [`retry`] - Retry classification and bounded backoff loops
//! - [`operation`] - Waiting on long-running operations
//! - [`lock`] - Process-wide per-cluster mutual exclusion
//! - [`planner`] - Diffing desired vs observed state into ordered update steps
//! - [`controller`] - Create / update / delete / reconcile workflows
//! - [`config`] - Timeouts and retry tuning
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod lock;
pub mod model;
pub mod operation;
pub mod planner;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default budget for waiting on a cluster creation operation
pub const DEFAULT_CREATE_TIMEOUT_SECS: u64 = 30 * 60;

/// Default budget for waiting on each update operation
pub const DEFAULT_UPDATE_TIMEOUT_SECS: u64 = 10 * 60;

/// Default budget for waiting on a cluster deletion operation
pub const DEFAULT_DELETE_TIMEOUT_SECS: u64 = 10 * 60;

/// Default interval between operation status queries
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Name of the node pool the control plane provisions when a cluster is
/// created with an initial node count and no explicit pools
pub const DEFAULT_NODE_POOL: &str = "default-pool";

/// Default control-plane API endpoint
pub const DEFAULT_API_ENDPOINT: &str = "https://container.googleapis.com";
