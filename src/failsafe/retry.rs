//! Retry logic with exponential backoff

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::debug;

use crate::config::RetryConfig;

/// Errors that can tell whether another attempt may succeed
pub trait Transient {
    /// `true` for failures worth retrying (connection errors, timeouts, 5xx)
    fn is_transient(&self) -> bool;
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Initial backoff
    pub initial_backoff: Duration,
    /// Maximum backoff
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
        }
    }

    /// Create an exponential backoff builder
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// Execute a future with bounded retry on transient errors
///
/// # Errors
///
/// Returns the last error from `f` once attempts are exhausted, or the first
/// non-transient error.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, name: &str, f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    f.retry(policy.backoff())
        .when(|e: &E| e.is_transient())
        .notify(|e: &E, delay: Duration| {
            debug!(
                operation = name,
                delay_ms = delay.as_millis(),
                error = %e,
                "Retrying after backoff"
            );
        })
        .await
}
