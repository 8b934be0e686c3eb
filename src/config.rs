//! Reconciler configuration
//!
//! Every budget the engine uses lives here. Values have sensible defaults and
//! can be overridden from a YAML file; durations are written in seconds (or
//! milliseconds for retry delays).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;
use crate::{
    Error, Result, DEFAULT_API_ENDPOINT, DEFAULT_CREATE_TIMEOUT_SECS, DEFAULT_DELETE_TIMEOUT_SECS,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_UPDATE_TIMEOUT_SECS,
};

/// Tuning for the reconciler and everything it drives
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcilerConfig {
    /// Budget for the creation operation
    #[serde(with = "serde_duration::secs")]
    pub create_timeout: Duration,

    /// Budget for each update operation
    #[serde(with = "serde_duration::secs")]
    pub update_timeout: Duration,

    /// Budget for the deletion operation
    #[serde(with = "serde_duration::secs")]
    pub delete_timeout: Duration,

    /// Interval between operation status queries
    #[serde(with = "serde_duration::secs")]
    pub poll_interval: Duration,

    /// Retry applied to each operation status query
    pub poll_retry: RetryConfig,

    /// Retry applied to a delete call rejected because the cluster is busy
    pub delete_retry: RetryConfig,

    /// Retry applied to dispatching a single update step
    pub dispatch_retry: RetryConfig,

    /// How many "operation not found" answers to tolerate while polling
    pub not_found_tolerance: u32,

    /// Project used when an identifier does not name one
    pub default_project: Option<String>,

    /// Control-plane API endpoint
    pub api_endpoint: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            create_timeout: Duration::from_secs(DEFAULT_CREATE_TIMEOUT_SECS),
            update_timeout: Duration::from_secs(DEFAULT_UPDATE_TIMEOUT_SECS),
            delete_timeout: Duration::from_secs(DEFAULT_DELETE_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            poll_retry: RetryConfig {
                max_attempts: 5,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(10),
                ..Default::default()
            },
            delete_retry: RetryConfig {
                max_attempts: 15,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
                max_elapsed: Some(Duration::from_secs(30)),
                ..Default::default()
            },
            dispatch_retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(10),
                ..Default::default()
            },
            not_found_tolerance: 3,
            default_project: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
        }
    }
}

impl ReconcilerConfig {
    /// Parse a config from YAML, filling unspecified fields with defaults
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&content)
    }

    /// Reject budgets that would make every wait fail instantly
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("createTimeout", self.create_timeout),
            ("updateTimeout", self.update_timeout),
            ("deleteTimeout", self.delete_timeout),
            ("pollInterval", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }
        if self.poll_interval > self.update_timeout {
            return Err(Error::config(
                "pollInterval must not exceed updateTimeout",
            ));
        }
        Ok(())
    }
}

/// Serde adapters for `Duration` fields written as plain integers
pub mod serde_duration {
    /// Durations as whole seconds
    pub mod secs {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize as seconds
        pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_u64(d.as_secs())
        }

        /// Deserialize from seconds
        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
            Ok(Duration::from_secs(u64::deserialize(d)?))
        }
    }

    /// Durations as whole milliseconds
    pub mod millis {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize as milliseconds
        pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_u64(d.as_millis() as u64)
        }

        /// Deserialize from milliseconds
        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
            Ok(Duration::from_millis(u64::deserialize(d)?))
        }
    }

    /// Optional durations as whole milliseconds
    pub mod opt_millis {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize as milliseconds or null
        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&(d.as_millis() as u64)),
                None => s.serialize_none(),
            }
        }

        /// Deserialize from milliseconds or null
        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
        }
    }
}
