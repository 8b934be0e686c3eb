//! Error types for cluster operations
//!
//! Errors are structured with fields to aid debugging in production. The
//! taxonomy drives retry classification: [`Error::is_retryable`] is the single
//! predicate every backoff loop consults.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for cluster operations
#[derive(Debug, Error)]
pub enum Error {
    /// A precondition failed before any remote call was made
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g., "private_cluster")
        field: Option<String>,
    },

    /// The control plane rejected a call synchronously
    #[error("remote request {operation} rejected ({code}): {message}")]
    RemoteRequest {
        /// The remote call that was rejected (e.g., "update_cluster")
        operation: String,
        /// HTTP status code
        code: u16,
        /// Canonical status string from the error payload (e.g., "FAILED_PRECONDITION")
        status: Option<String>,
        /// Message from the error payload
        message: String,
        /// Whether the rejection means the resource is busy with another operation
        not_ready: bool,
    },

    /// The request never got a response (connection, DNS, timeout)
    #[error("transport error: {message}")]
    Transport {
        /// Description of what failed
        message: String,
    },

    /// An operation reached DONE carrying an error payload
    #[error("operation {operation_id} ({description}) failed: {payload}")]
    OperationFailed {
        /// Remote operation id
        operation_id: String,
        /// What the operation was doing
        description: String,
        /// Error payload reported by the control plane
        payload: String,
    },

    /// A local wait budget ran out while the remote work was still in flight
    #[error("timed out after {budget:?} waiting for {what}")]
    TimeoutExceeded {
        /// What was being waited on
        what: String,
        /// The budget that elapsed
        budget: Duration,
    },

    /// A bounded retry loop used up its attempts against a retryable condition
    #[error("{operation} gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Name of the retried operation
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Last error message
        last_error: String,
    },

    /// Querying an operation's status kept failing
    #[error("polling operation {operation_id} failed: {source}")]
    PollFailed {
        /// Remote operation id
        operation_id: String,
        /// Why polling stopped
        #[source]
        source: Box<Error>,
    },

    /// The addressed resource does not exist
    #[error("not found: {resource}")]
    NotFound {
        /// Full name of the missing resource
        resource: String,
    },

    /// The parent cluster is not in a state that allows node pool changes
    #[error("cluster {cluster} is not stable (status {status})")]
    ParentNotStable {
        /// Cluster name
        cluster: String,
        /// Status observed
        status: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Invalid local configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    ///
    /// For simple validation errors without cluster context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field name
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a synchronous rejection error
    pub fn remote(operation: impl Into<String>, code: u16, msg: impl Into<String>) -> Self {
        Self::RemoteRequest {
            operation: operation.into(),
            code,
            status: None,
            message: msg.into(),
            not_ready: false,
        }
    }

    /// Create a rejection meaning "the resource is busy, try again later"
    pub fn remote_not_ready(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RemoteRequest {
            operation: operation.into(),
            code: 400,
            status: Some("FAILED_PRECONDITION".to_string()),
            message: msg.into(),
            not_ready: true,
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    /// Create an operation failure from a terminal error payload
    pub fn operation_failed(
        operation_id: impl Into<String>,
        description: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self::OperationFailed {
            operation_id: operation_id.into(),
            description: description.into(),
            payload: payload.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(what: impl Into<String>, budget: Duration) -> Self {
        Self::TimeoutExceeded {
            what: what.into(),
            budget,
        }
    }

    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Transport failures, server-side unavailability and "not ready"
    /// preconditions are retryable. Everything else needs either a config fix
    /// or a fresh look at remote state.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::RemoteRequest {
                code, not_ready, ..
            } => *not_ready || matches!(code, 429 | 500 | 502 | 503 | 504),
            Error::Validation { .. }
            | Error::OperationFailed { .. }
            | Error::TimeoutExceeded { .. }
            | Error::RetriesExhausted { .. }
            | Error::PollFailed { .. }
            | Error::NotFound { .. }
            | Error::ParentNotStable { .. }
            | Error::Serialization { .. }
            | Error::Config { .. } => false,
        }
    }

    /// True if the control plane reported the resource busy with another operation
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::RemoteRequest { not_ready: true, .. })
    }

    /// True if the addressed resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Get the cluster name if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Validation { cluster, .. } => Some(cluster),
            Error::ParentNotStable { cluster, .. } => Some(cluster),
            _ => None,
        }
    }

    /// Short, stable name of the error category for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::RemoteRequest { .. } => "remote_request",
            Error::Transport { .. } => "transport",
            Error::OperationFailed { .. } => "operation_failed",
            Error::TimeoutExceeded { .. } => "timeout_exceeded",
            Error::RetriesExhausted { .. } => "retries_exhausted",
            Error::PollFailed { .. } => "poll_failed",
            Error::NotFound { .. } => "not_found",
            Error::ParentNotStable { .. } => "parent_not_stable",
            Error::Serialization { .. } => "serialization",
            Error::Config { .. } => "config",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
