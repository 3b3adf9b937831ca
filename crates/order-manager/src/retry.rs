//! Retry Policy
//!
//! Bounded retries with exponential backoff for exchange calls. Only
//! transient errors (rate limits, timeouts, network failures) are retried;
//! every attempt reuses the caller's request, so the idempotency key carried
//! in it stays the same across attempts.

use copytrade_ports::{ExchangeError, ExchangeResult};
use log::warn;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry budget and backoff, stated as data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            multiplier: 2,
            max_delay_ms: 5_000,
        }
    }
}

/// Final result of a retried call
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: ExchangeResult<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(retry.saturating_sub(1));
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Run `call` until it succeeds, fails permanently or the budget is spent
    ///
    /// Each attempt is bounded by `timeout`; an attempt that exceeds it counts
    /// as a transient timeout.
    pub async fn run<T, F, Fut>(&self, label: &str, timeout: Duration, mut call: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ExchangeError::timeout(format!(
                    "no response within {}ms",
                    timeout.as_millis()
                ))),
            };

            match result {
                Err(err) if err.is_transient() && attempt < self.attempts() => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "[RETRY] {label}: attempt {attempt}/{} failed ({err}), retrying in {}ms",
                        self.attempts(),
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                result => {
                    return Attempted {
                        result,
                        attempts: attempt,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytrade_ports::ExchangeErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            multiplier: 3,
            max_delay_ms: 1_000,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for(3), Duration::from_millis(900));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let attempted = RetryPolicy::default()
            .run("entry", Duration::from_secs(1), move || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(ExchangeError::rate_limited("429")),
                    _ => Ok(7),
                }
            })
            .await;

        assert_eq!(attempted.result.unwrap(), 7);
        assert_eq!(attempted.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let attempted: Attempted<()> = RetryPolicy::default()
            .run("entry", Duration::from_secs(1), || async {
                Err(ExchangeError::auth("bad key"))
            })
            .await;

        assert!(attempted.result.unwrap_err().is_auth());
        assert_eq!(attempted.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_calls_time_out_and_exhaust_budget() {
        let attempted: Attempted<()> = RetryPolicy::default()
            .run("entry", Duration::from_millis(500), || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert_eq!(attempted.result.unwrap_err().kind, ExchangeErrorKind::Timeout);
        assert_eq!(attempted.attempts, 3);
    }
}
