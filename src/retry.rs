//! Retry policy for external service calls.
//!
//! Every boundary call (embedding, LLM, vector store) runs through the same
//! policy object instead of ad hoc sleep loops at each call site. Backoff
//! doubles per retry (1s, 2s, 4s, ...) and caps at 2^5 x base.

use std::future::Future;
use std::time::Duration;

use crate::error::OpsError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Must be >= 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait before the given attempt (1-based; attempt 1 has none).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay * (1u32 << (attempt - 2).min(5))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the policy's
/// attempt budget is exhausted.
pub async fn with_retry<T, Fut, F>(
    policy: &RetryPolicy,
    service: &'static str,
    mut op: F,
) -> Result<T, OpsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OpsError>>,
{
    let mut last_err = None;

    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                tracing::warn!(service, attempt, error = %e, "retrying after transient failure");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| OpsError::transient(service, "retries exhausted")))
}
