//! # Retry Policy
//!
//! Bounded retries with exponential backoff for operations returning
//! [`crate::error::Result`]. Which errors qualify is decided by a predicate,
//! [`MigrationError::is_retryable`] unless replaced.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{MigrationError, Result};

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `retry` (1-based), capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

type RetryPredicate = Arc<dyn Fn(&MigrationError) -> bool + Send + Sync>;

/// Maximum attempts, backoff and the retryable-error predicate
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffConfig,
    retryable: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    /// A single attempt: nothing is retried
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffConfig) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retryable: Arc::new(MigrationError::is_retryable),
        }
    }

    /// Run every operation exactly once
    pub fn none() -> Self {
        Self::new(1, BackoffConfig::default())
    }

    /// Replace the retryable-error predicate
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&MigrationError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    pub fn should_retry(&self, err: &MigrationError, attempt: u32) -> bool {
        attempt < self.max_attempts && (self.retryable)(err)
    }

    /// Run `operation`, retrying qualifying failures with backoff
    ///
    /// `name` identifies the operation in log messages. The last error is
    /// returned once attempts are exhausted or a failure does not qualify.
    pub async fn run<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(&err, attempt) => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        operation = name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "🔁 RETRY: Operation failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if attempt > 1 {
                        error!(
                            operation = name,
                            attempts = attempt,
                            error = %err,
                            "❌ RETRY: Giving up"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}
