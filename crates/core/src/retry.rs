//! Timeout and retry wrapper applied to every external call.

use std::{fmt::Display, future::Future, time::Duration};

use tokio::time::{sleep, timeout};
use tracing::warn;

/// Builds the "timed out" variant of a stage error.
pub trait TimeoutError {
    fn timed_out(after: Duration) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub call_timeout: Duration,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            call_timeout: Duration::from_secs(45),
            delay: Duration::from_millis(500),
        }
    }
}

/// Runs `operation` until it succeeds or the policy's attempts are used up.
///
/// Each attempt is bounded by `call_timeout`; an elapsed timeout counts as a
/// failed attempt. The last error is returned unchanged.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, stage: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: TimeoutError + Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match timeout(policy.call_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.call_timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => {
                warn!(stage, attempt, error = %err, "giving up");
                return Err(err);
            }
            Err(err) => {
                warn!(stage, attempt, wait = ?policy.delay, error = %err, "retrying");
                if !policy.delay.is_zero() {
                    sleep(policy.delay).await;
                }
            }
        }
    }
}
