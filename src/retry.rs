//! Retry utilities with exponential backoff and jitter.
//!
//! One executor serves every retry site (operation polling, the delete
//! precondition loop, step dispatch). Callers pass the predicate that decides
//! which errors are worth another attempt; anything else returns immediately.
//!
//! The loop is bounded twice: by attempt count and by elapsed time. Whichever
//! bound trips first decides the outcome, [`Error::RetriesExhausted`] or
//! [`Error::TimeoutExceeded`], so callers can tell "gave up" from "told no".
//!
//! # Example
//!
//! ```ignore
//! use clusterops::retry::{retry_with_backoff, RetryConfig};
//!
//! let op = retry_with_backoff(
//!     &RetryConfig::with_max_attempts(15),
//!     "delete_cluster",
//!     |e| e.is_retryable(),
//!     || async { api.delete_cluster(version, &identity).await },
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, warn};

use crate::config::serde_duration;
use crate::{Error, Result};

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    #[serde(with = "serde_duration::millis")]
    pub initial_delay: Duration,
    /// Maximum delay between retries
    #[serde(with = "serde_duration::millis")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Randomize each delay to 0.5x-1.5x
    pub jitter: bool,
    /// Overall budget across all attempts (None = unbounded)
    #[serde(with = "serde_duration::opt_millis")]
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            max_elapsed: None,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Create a config that retries forever (infinite attempts)
    pub fn infinite() -> Self {
        Self::default()
    }

    /// Fixed delay between attempts, no jitter
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
            max_elapsed: None,
        }
    }

    /// Bound the loop by total elapsed time as well
    pub fn with_max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    /// Copy of this config whose elapsed budget never exceeds `budget`
    pub fn capped_to(&self, budget: Duration) -> Self {
        let mut capped = self.clone();
        capped.max_elapsed = Some(self.max_elapsed.map_or(budget, |own| own.min(budget)));
        capped
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Name for logging and for the exhaustion error
/// * `is_retryable` - Decides whether an error earns another attempt
/// * `operation` - The async operation to retry
///
/// # Returns
/// The operation's result; the first non-retryable error unchanged;
/// [`Error::RetriesExhausted`] when attempts run out; or
/// [`Error::TimeoutExceeded`] when `max_elapsed` runs out first.
pub async fn retry_with_backoff<F, Fut, T, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut is_retryable: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: FnMut(&Error) -> bool,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !is_retryable(&e) {
            return Err(e);
        }

        // Attempt bound is checked first: when both bounds trip on the same
        // attempt the caller sees RetriesExhausted.
        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %e,
                "Operation failed after max retries"
            );
            return Err(Error::RetriesExhausted {
                operation: operation_name.to_string(),
                attempts: attempt,
                last_error: e.to_string(),
            });
        }

        let mut sleep_for = if config.jitter {
            let jitter = rand::thread_rng().gen_range(0.5..1.5);
            Duration::from_secs_f64(delay.as_secs_f64() * jitter)
        } else {
            delay
        };

        if let Some(budget) = config.max_elapsed {
            let elapsed = started.elapsed();
            if elapsed >= budget {
                error!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    budget_ms = budget.as_millis(),
                    "Operation retry budget elapsed"
                );
                return Err(Error::timeout(
                    format!("{operation_name} to succeed (last error: {e})"),
                    budget,
                ));
            }
            sleep_for = sleep_for.min(budget - elapsed);
        }

        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %e,
            delay_ms = sleep_for.as_millis(),
            "Operation failed, retrying"
        );

        tokio::time::sleep(sleep_for).await;

        delay = config.next_delay(delay);
    }
}

/// [`retry_with_backoff`] using [`Error::is_retryable`] as the predicate
pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(config, operation_name, Error::is_retryable, operation).await
}
