use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tracing::debug;

/// Errors that may clear up if the same call is made again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

const RANDOMIZATION_FACTOR: f64 = 0.1;
const MULTIPLIER: f64 = 2.0;
// The interval is pinned to `max` long before this many doublings.
const MAX_STEPS: u32 = 64;

/// Doubling delays from `base` capped at `max`, with 10% jitter, for at most
/// `attempts` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
    attempts: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration, attempts: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            attempts: attempts.max(1),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base)
            .with_randomization_factor(RANDOMIZATION_FACTOR)
            .with_multiplier(MULTIPLIER)
            .with_max_interval(self.max)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delay before retry `attempt` (0 = first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut schedule = self.schedule();
        let mut delay = self.base;
        for _ in 0..=attempt.min(MAX_STEPS) {
            delay = schedule.next_backoff().unwrap_or(self.max);
        }
        delay.min(self.max)
    }

    /// Runs `op` until it succeeds, fails permanently or the attempt budget
    /// is spent. The last error is returned.
    pub async fn retry<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let budget = self.attempts;
        let mut calls = 0u32;
        backoff::future::retry_notify(
            self.schedule(),
            || {
                calls += 1;
                let last = calls >= budget;
                let call = op();
                async move {
                    call.await.map_err(|err| {
                        if err.is_transient() && !last {
                            backoff::Error::transient(err)
                        } else {
                            backoff::Error::permanent(err)
                        }
                    })
                }
            },
            |err: E, delay: Duration| debug!(call = label, ?delay, error = %err, "retrying"),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky({})", self.0)
        }
    }

    impl Transient for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    fn within(delay: Duration, low_ms: u64, high_ms: u64) -> bool {
        delay >= Duration::from_millis(low_ms) && delay <= Duration::from_millis(high_ms)
    }

    #[test]
    fn delay_doubles_with_jitter_and_caps() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 5);
        for _ in 0..16 {
            assert!(within(policy.delay(0), 899, 1_101));
            assert!(within(policy.delay(1), 1_799, 2_201));
            assert!(within(policy.delay(3), 7_199, 8_801));
            assert!(within(policy.delay(40), 8_999, 10_000));
        }
    }

    #[test]
    fn zero_base_never_waits() {
        let policy = RetryPolicy::new(Duration::ZERO, Duration::ZERO, 1);
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(7), Duration::ZERO);
    }

    #[tokio::test]
    async fn retry_stops_after_budget() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 3);
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = policy
            .retry("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(true)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_error_then_success() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 3);
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> = policy
            .retry("test", || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Err(Flaky(true))
                    } else {
                        Ok(call)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 3);
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = policy
            .retry("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(false)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
