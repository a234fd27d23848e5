//! Retry with exponential backoff.
//!
//! A [`RetryPolicy`] bounds the number of attempts and computes the delay
//! after each failure as `base × 2^attempt`, where `attempt` is the
//! 1-based number of the attempt that just failed. With the default
//! 1-second base and 3 attempts this sleeps 2s, then 4s.
//!
//! Configuration and validation errors (see [`crate::error::is_permanent`])
//! end the loop immediately. Sleeping uses `tokio::time::sleep`, so a
//! retrying task yields to the runtime instead of blocking its thread.
//!
//! ```rust,ignore
//! let policy = RetryPolicy::default();
//! let outcome = with_retry_outcome(&policy, || async { call_model().await }).await;
//! println!("{} attempt(s)", outcome.attempts);
//! ```

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::is_permanent;

/// Default maximum attempts (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponent cap; 2^16 × base is already far beyond any useful delay.
const MAX_EXPONENT: u32 = 16;

/// Configuration for retry behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, first try included. Treated as at least 1.
    pub max_attempts: u32,
    /// Multiplied by `2^attempt` to get the delay after a failed attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay to wait after attempt number `attempt` (1-based) fails.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.min(MAX_EXPONENT))
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The result (success or final error).
    pub result: Result<T>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Total time spent, delays included.
    pub elapsed: Duration,
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// attempts are exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_outcome(policy, operation).await.result
}

/// Like [`with_retry`], but also reports the attempt count and elapsed time.
pub async fn with_retry_outcome<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempts = attempt, "Operation succeeded after retries");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    elapsed: start.elapsed(),
                };
            }
            Err(e) if is_permanent(&e) || attempt >= max => {
                if attempt >= max && max > 1 {
                    warn!(attempt, max_attempts = max, error = %e, "Operation failed after all attempts");
                }
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                    elapsed: start.elapsed(),
                };
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying operation after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let outcome = with_retry_outcome(&RetryPolicy::default(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("flaky");
            }
            Ok(42)
        })
        .await;
        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 3);
        // 2s + 4s of (virtual) backoff.
        assert!(outcome.elapsed >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = with_retry_outcome(&RetryPolicy::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("down")
        })
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = with_retry_outcome(&RetryPolicy::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ValidationError::ZeroThreshold.into())
        })
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
    }
}
