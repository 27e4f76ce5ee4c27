/// Shared retry/backoff policy.
///
/// Every retry loop in the engine (feed reconnects, provider fetches,
/// swap submission) goes through this one combinator so cadence tuning
/// happens in one place.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// base * 2^(attempt-1)
    Exponential,
    /// base * attempt^2, used for slow-moving metadata providers
    Quadratic,
}

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub growth: Growth,
    /// Add up to 20% random jitter to each delay
    pub jitter: bool,
}

impl BackoffPolicy {
    /// Three quick attempts, 500ms base. The default for HTTP calls.
    pub fn transient() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            growth: Growth::Exponential,
            jitter: true,
        }
    }

    /// Feed reconnect cadence: 5s doubling up to 60s, effectively unbounded attempts.
    pub fn reconnect() -> Self {
        Self {
            max_attempts: u32::MAX,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            growth: Growth::Exponential,
            jitter: true,
        }
    }

    /// Price-provider cadence: newly created pools take a while to show
    /// up on aggregators, so wait 7s then grow quadratically.
    pub fn price_listing() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(7),
            max_delay: Duration::from_secs(90),
            growth: Growth::Quadratic,
            jitter: false,
        }
    }

    /// Delay before retry number `attempt` (1-based; attempt 1 is the
    /// delay after the first failure).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_ms = self.base_delay.as_millis() as u64;
        let scaled_ms = match self.growth {
            Growth::Exponential => base_ms.saturating_mul(1u64 << (attempt - 1).min(16)),
            Growth::Quadratic => base_ms.saturating_mul(u64::from(attempt) * u64::from(attempt)),
        };
        let capped = scaled_ms.min(self.max_delay.as_millis() as u64);

        let final_ms = if self.jitter {
            let spread = capped / 5;
            if spread > 0 {
                capped + rand::thread_rng().gen_range(0..=spread)
            } else {
                capped
            }
        } else {
            capped
        };

        Duration::from_millis(final_ms)
    }
}

/// Run `operation` until it succeeds, the error is not retryable, or
/// attempts run out. The last error is returned unchanged.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &BackoffPolicy,
    op_name: &str,
    mut operation: F,
    mut retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    R: FnMut(&E) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(op = op_name, attempt, "Operation recovered after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt >= policy.max_attempts || !retryable(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    op = op_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "Operation failed, retrying in {:?}", delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn exponential_delays_double_and_cap() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            growth: Growth::Exponential,
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(4), Duration::from_secs(40));
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for(12), Duration::from_secs(60));
    }

    #[test]
    fn quadratic_delays_grow_with_square() {
        let policy = BackoffPolicy {
            jitter: false,
            ..BackoffPolicy::price_listing()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(7));
        assert_eq!(policy.delay_for(2), Duration::from_secs(28));
        assert_eq!(policy.delay_for(3), Duration::from_secs(63));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(1),
            jitter: false,
            ..BackoffPolicy::transient()
        };

        let counter = Arc::clone(&calls);
        let result: Result<u32, String> = retry_with_backoff(
            &policy,
            "test_op",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("flaky".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), String> = retry_with_backoff(
            &BackoffPolicy::transient(),
            "test_op",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                }
            },
            |_| false,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            jitter: false,
            ..BackoffPolicy::transient()
        };
        let counter = Arc::clone(&calls);
        let result: Result<(), String> = retry_with_backoff(
            &policy,
            "test_op",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("still flaky".to_string())
                }
            },
            |_| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
