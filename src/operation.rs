//! Long-running operations and waiting on them
//!
//! Every mutating call returns an [`Operation`]. [`OperationPoller::wait`]
//! queries it at a fixed interval until it is terminal or the wait budget runs
//! out. Abandoning a wait never cancels the remote operation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::{ApiVersion, ContainerApi};
use crate::config::ReconcilerConfig;
use crate::model::{ResourceIdentity, ResourceStatus};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// Error payload attached to a finished operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    /// Canonical status code, if reported
    pub code: Option<i32>,
    /// Human-readable detail
    pub message: String,
}

/// Handle to one asynchronous remote mutation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Remote operation id
    pub id: String,
    /// Cluster the operation acts on
    pub target: ResourceIdentity,
    /// Remote operation type, e.g. `UPGRADE_MASTER`
    #[serde(default)]
    pub operation_type: String,
    /// Lifecycle status
    pub status: ResourceStatus,
    /// Terminal error payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    /// When the control plane started the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the control plane finished it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Operation {
    /// A freshly dispatched operation
    pub fn pending(id: impl Into<String>, target: ResourceIdentity) -> Self {
        Self {
            id: id.into(),
            target,
            operation_type: String::new(),
            status: ResourceStatus::Pending,
            error: None,
            start_time: None,
            end_time: None,
        }
    }

    /// True once the operation will not change again
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ResourceStatus::Done | ResourceStatus::Error)
    }

    /// Turn a terminal operation into its outcome
    ///
    /// DONE without a payload succeeds. DONE with a payload, or ERROR, fails
    /// with [`Error::OperationFailed`].
    fn into_outcome(self, description: &str) -> Result<Self> {
        if let Some(payload) = &self.error {
            return Err(Error::operation_failed(
                &self.id,
                description,
                &payload.message,
            ));
        }
        if self.status != ResourceStatus::Done {
            return Err(Error::operation_failed(
                &self.id,
                description,
                format!("operation ended with status {}", self.status),
            ));
        }
        Ok(self)
    }
}

/// Waits for operations to reach a terminal state
pub struct OperationPoller {
    api: Arc<dyn ContainerApi>,
    version: ApiVersion,
    poll_retry: RetryConfig,
    not_found_tolerance: u32,
}

impl OperationPoller {
    /// Create a poller that queries through `api` on the given API surface
    pub fn new(api: Arc<dyn ContainerApi>, version: ApiVersion, config: &ReconcilerConfig) -> Self {
        Self {
            api,
            version,
            poll_retry: config.poll_retry.clone(),
            not_found_tolerance: config.not_found_tolerance,
        }
    }

    /// Wait until `operation` is terminal or `budget` elapses
    ///
    /// # Errors
    ///
    /// - [`Error::OperationFailed`] when the operation finished with an error
    /// - [`Error::TimeoutExceeded`] when the budget ran out first
    /// - [`Error::PollFailed`] when status queries kept failing transiently
    /// - any non-transient query error, unchanged
    pub async fn wait(
        &self,
        operation: Operation,
        description: &str,
        poll_interval: Duration,
        budget: Duration,
    ) -> Result<Operation> {
        let deadline = Instant::now() + budget;
        let mut current = operation;
        let mut polls = 0u32;
        let mut not_found_streak = 0u32;

        loop {
            if current.is_terminal() {
                debug!(
                    operation = %current.id,
                    polls = polls,
                    status = %current.status,
                    "Operation terminal"
                );
                return current.into_outcome(description);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    operation = %current.id,
                    description = %description,
                    budget_secs = budget.as_secs(),
                    "Gave up waiting for operation; it keeps running remotely"
                );
                return Err(Error::timeout(
                    format!("operation {} ({})", current.id, description),
                    budget,
                ));
            }

            tokio::time::sleep(poll_interval.min(deadline - now)).await;
            polls += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            current = self
                .query(&current, remaining, &mut not_found_streak)
                .await?;
            debug!(
                operation = %current.id,
                poll = polls,
                status = %current.status,
                "Polled operation"
            );
        }
    }

    /// One status query, retried while failures are transient
    async fn query(
        &self,
        current: &Operation,
        remaining: Duration,
        not_found_streak: &mut u32,
    ) -> Result<Operation> {
        let tolerance = self.not_found_tolerance;
        let retry = self.poll_retry.capped_to(remaining);
        let api = &self.api;
        let version = self.version;
        let target = &current.target;
        let id = current.id.as_str();

        let result = retry_with_backoff(
            &retry,
            "get_operation",
            |e: &Error| {
                // A just-created operation may not be visible yet
                if e.is_not_found() {
                    *not_found_streak += 1;
                    return *not_found_streak <= tolerance;
                }
                e.is_retryable()
            },
            || api.get_operation(version, target, id),
        )
        .await;

        match result {
            Ok(op) => {
                *not_found_streak = 0;
                Ok(op)
            }
            Err(e @ (Error::RetriesExhausted { .. } | Error::NotFound { .. })) => {
                Err(Error::PollFailed {
                    operation_id: current.id.clone(),
                    source: Box::new(e),
                })
            }
            Err(e) => Err(e),
        }
    }
}
