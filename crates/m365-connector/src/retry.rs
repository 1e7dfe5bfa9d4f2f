//! Bounded retry with exponential backoff for transient remote failures.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ProvisionError, ProvisionResult};

/// Retry policy configuration.
///
/// `max_attempts` counts every attempt, including the first one. The delay
/// before retry `n` (0-based) is `backoff_base^n` seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Base of the exponential backoff, in seconds.
    pub backoff_base: u64,
    /// Unit the backoff is expressed in. Seconds in production.
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2,
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt ceiling and backoff base.
    #[must_use]
    pub fn new(max_attempts: u32, backoff_base: u64) -> Self {
        Self {
            max_attempts,
            backoff_base,
            ..Self::default()
        }
    }

    /// Creates a policy that keeps the attempt ceiling but does not sleep.
    #[must_use]
    pub fn without_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_base: 2,
            unit: Duration::ZERO,
        }
    }

    /// Delay to wait after the given 0-based failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_base.saturating_pow(attempt);
        self.unit
            .saturating_mul(u32::try_from(factor).unwrap_or(u32::MAX))
    }

    /// Whether another attempt is allowed after the given 0-based attempt failed.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &ProvisionError) -> bool {
        attempt + 1 < self.max_attempts && error.is_retryable()
    }

    /// Executes an async operation, retrying transient failures.
    ///
    /// Non-retryable errors return immediately. When the ceiling is reached
    /// on a transient error, the error is surfaced with the real attempt count.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut f: F) -> ProvisionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProvisionResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) if self.should_retry(attempt, &error) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(ProvisionError::TransientRemote {
                    status, message, ..
                }) => {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        status,
                        "Retry ceiling reached"
                    );
                    return Err(ProvisionError::TransientRemote {
                        status,
                        attempts: attempt + 1,
                        message,
                    });
                }
                Err(error) => return Err(error),
            }
        }
    }
}
