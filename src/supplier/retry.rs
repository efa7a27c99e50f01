//! Declarative retry policy for supplier calls

use super::error::SupplierError;
use crate::config::SupplierConfig;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl From<&SupplierConfig> for RetryPolicy {
    fn from(config: &SupplierConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.backoff_multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success(T),
    /// Every attempt failed with a transient error.
    Exhausted {
        attempts: u32,
        last_error: SupplierError,
    },
    /// A non-transient error; no further attempts were made.
    Failed(SupplierError),
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Default::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Wait before retry number `retry` (0 = the wait after the first failure).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// A supplier-provided Retry-After wins over the computed backoff but is
    /// still capped by `max_delay`.
    fn wait_after(&self, retry: u32, err: &SupplierError) -> Duration {
        let computed = self.delay_for(retry);
        match err.retry_after() {
            Some(hint) => hint.max(computed).min(self.max_delay),
            None => computed,
        }
    }

    /// Run `op` until it succeeds, fails permanently or runs out of attempts.
    /// Sleeps only between attempts, never after the last one.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SupplierError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return RetryOutcome::Success(value),
                Err(err) if !err.is_transient() => return RetryOutcome::Failed(err),
                Err(err) if attempt >= self.max_attempts => {
                    warn!(operation, attempts = attempt, error = %err, "supplier retries exhausted");
                    return RetryOutcome::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    };
                }
                Err(err) => {
                    let wait = self.wait_after(attempt - 1, &err);
                    debug!(
                        operation,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "transient supplier error, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100)).with_max_delay(Duration::from_millis(350));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn retry_after_hint_is_capped() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10)).with_max_delay(Duration::from_millis(50));
        let err = SupplierError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(policy.wait_after(0, &err), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn persistent_rate_limit_uses_exact_attempt_budget() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = policy
            .run("search", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SupplierError::RateLimited { retry_after: None }) }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = policy
            .run("reprice", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SupplierError::OfferUnavailable {
                        offer_id: "o-1".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let outcome = policy
            .run("search", |attempt| async move {
                if attempt < 2 {
                    Err(SupplierError::Network("reset".to_string()))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Success(2)));
    }
}
