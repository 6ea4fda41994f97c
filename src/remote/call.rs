//! Per-operation timeout and bounded retry for remote calls.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Timeout and retry budget applied to a single remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for one attempt
    pub timeout: Duration,
    /// Attempts including the first
    pub max_attempts: u32,
    /// Base delay, multiplied by the attempt number
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Single attempt under `timeout`, for reads where a retry is not worth
    /// the wait (cache-tier lookups)
    pub fn once(timeout: Duration) -> Self {
        Self {
            timeout,
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// Run `f` under `policy`. Each attempt gets its own deadline; only
/// transient errors ([`Error::is_transient`]) are retried.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(policy.timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("{} exceeded {:?}", op, policy.timeout))),
        };

        match result {
            Err(err) if err.is_transient() && attempt < max_attempts => {
                tracing::debug!(op, attempt, "Transient remote failure, retrying: {}", err);
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(err) => {
                if attempt > 1 {
                    tracing::warn!(op, attempts = attempt, "Remote call failed: {}", err);
                }
                return Err(err);
            }
            ok => return ok,
        }
    }
}
