//! Bounded retry with exponential backoff
//!
//! Delays follow the error's [`RetryHint`]: transient and server errors back
//! off `base, 2·base, 4·base, ...`; rate-limited errors wait for the quota
//! to refill without growing the backoff; client and parse errors are
//! returned at once.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{RequestError, RetryHint};

/// Retry bounds for one logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// First backoff delay
    pub base_delay: Duration,
    /// Wait used for rate-limited errors without a server reset hint
    pub refill_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            refill_interval: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following the `step`-th backoff failure
    pub fn backoff_delay(&self, step: u32) -> Duration {
        let factor = 2u32.checked_pow(step).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempts
/// run out
///
/// `operation` receives the 1-based attempt number. The last error is
/// returned unchanged.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RequestError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempt = 1;
    let mut backoff_step = 0;

    loop {
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= policy.max_attempts {
            return Err(err);
        }

        let delay = match err.retry_hint() {
            RetryHint::Never => return Err(err),
            RetryHint::Backoff => {
                let delay = policy.backoff_delay(backoff_step);
                backoff_step += 1;
                delay
            }
            RetryHint::AfterRefill(reset) => reset.unwrap_or(policy.refill_interval),
        };

        debug!(
            "Attempt {}/{} failed ({}), retrying in {:?}",
            attempt, policy.max_attempts, err, delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
