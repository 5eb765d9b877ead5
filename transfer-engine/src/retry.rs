//! Retry/Backoff Controller - exponential backoff with jitter for contended transfers
//!
//! The overall timeout is one budget shared by every attempt. It is checked
//! before an attempt starts, never during one: an attempt that is already
//! running when the budget runs out still ends in commit or rollback.

use crate::{cancel::CancellationToken, metrics::Metrics, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Relative jitter (0.1 = ±10%); 0.0 disables it
    pub jitter_factor: f64,
    /// Budget shared across all attempts
    pub overall_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 10,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
            overall_timeout_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Policy doubling from `initial_delay` with the default jitter and no
    /// delay cap
    pub fn new(max_attempts: u32, initial_delay: Duration, overall_timeout: Duration) -> Self {
        let defaults = Self::default();
        let initial_delay_ms = initial_delay.as_millis() as u64;
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms: u64::MAX,
            overall_timeout_ms: overall_timeout.as_millis() as u64,
            ..defaults
        }
    }

    /// Same policy without jitter
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Overall budget
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    /// Reject policies that can never make an attempt
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(Error::Config(format!(
                "jitter_factor must be within [0, 1], got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (0 = first retry)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);

        // Cap at max_delay
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

/// Drives an operation until it succeeds, fails fatally, or runs out of budget
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    metrics: Option<Metrics>,
}

impl RetryController {
    /// Create a new controller
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: None,
        }
    }

    /// Count retries and contention in `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` with retries.
    ///
    /// `operation` receives the 1-based attempt number and the caller's
    /// `token`. The overall timeout stays with the controller: it gates the
    /// start of each attempt and is never handed to the attempt itself.
    pub fn run<T, F>(
        &self,
        operation_name: &str,
        token: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32, &CancellationToken) -> Result<T>,
    {
        let budget = token.narrowed(self.policy.overall_timeout());
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.policy.delay_for(attempt - 2);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_retry();
                }
                if !budget.sleep(delay) {
                    break;
                }
            }
            if budget.is_cancelled() {
                break;
            }

            attempts = attempt;
            match operation(attempt, token) {
                Ok(result) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempt, max_attempts, "Operation succeeded on retry"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(operation = operation_name, attempt, error = %e, "Non-retryable error");
                    return Err(e);
                }
                Err(e) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_contention();
                    }
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Attempt failed with retryable error"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => {
                warn!(operation = operation_name, attempts, error = %last, "Retries exhausted");
                Err(Error::RetriesExhausted {
                    attempts,
                    last: Box::new(last),
                })
            }
            None => Err(Error::Cancelled(format!(
                "{} not attempted: deadline passed",
                operation_name
            ))),
        }
    }
}

/// Run `operation` with doubling backoff from `initial_delay`, at most
/// `max_attempts` times, all inside `overall_timeout`
pub fn run_with_retry<T, F>(
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
    overall_timeout: Duration,
) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    RetryController::new(RetryPolicy::new(max_attempts, initial_delay, overall_timeout)).run(
        "operation",
        &CancellationToken::new(),
        |attempt, _| operation(attempt),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{AccountId, TxnId};
    use std::time::Instant;

    fn serialization_failure() -> Error {
        Error::SerializationFailure {
            txn: TxnId::new(1),
            account: AccountId::new(1),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_secs(5))
            .without_jitter()
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_factor: 0.0,
            overall_timeout_ms: 60_000,
        };

        assert_eq!(policy.delay_for(0).as_millis(), 100);
        assert_eq!(policy.delay_for(1).as_millis(), 200);
        assert_eq!(policy.delay_for(2).as_millis(), 400);
    }

    #[test]
    fn test_positional_policy_doubles_without_cap() {
        let policy =
            RetryPolicy::new(4, Duration::from_millis(600), Duration::from_secs(30)).without_jitter();
        assert_eq!(policy.max_delay_ms, u64::MAX);
        assert_eq!(policy.delay_for(0).as_millis(), 600);
        assert_eq!(policy.delay_for(1).as_millis(), 1_200);
        assert_eq!(policy.delay_for(2).as_millis(), 2_400);
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy {
            max_delay_ms: 500,
            initial_delay_ms: 100,
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(30).as_millis(), 500);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            initial_delay_ms: 100,
            jitter_factor: 0.1,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.delay_for(0).as_millis();
            assert!((90..=110).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        }
        .validate()
        .is_err());
        assert!(RetryPolicy {
            jitter_factor: 2.0,
            ..RetryPolicy::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_succeeds_after_k_failures_with_k_plus_one_calls() {
        let k = 3;
        let mut calls = 0;
        let result = RetryController::new(fast_policy(k + 2)).run(
            "test",
            &CancellationToken::new(),
            |attempt, _| {
                calls += 1;
                assert_eq!(attempt, calls);
                if calls <= k {
                    Err(serialization_failure())
                } else {
                    Ok(calls)
                }
            },
        );

        assert_eq!(result.unwrap(), k + 1);
        assert_eq!(calls, k + 1);
    }

    #[test]
    fn test_non_retryable_short_circuits() {
        let mut calls = 0;
        let err = RetryController::new(fast_policy(5))
            .run("test", &CancellationToken::new(), |_, _| -> Result<()> {
                calls += 1;
                Err(Error::Validation("bad".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_exhaustion_wraps_last_cause() {
        let mut calls = 0;
        let err = RetryController::new(fast_policy(3))
            .run("test", &CancellationToken::new(), |_, _| -> Result<()> {
                calls += 1;
                Err(serialization_failure())
            })
            .unwrap_err();

        assert_eq!(calls, 3);
        match err {
            Error::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::SerializationFailure { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_deadline_stops_new_attempts() {
        let policy = RetryPolicy {
            max_attempts: 100,
            initial_delay_ms: 20,
            max_delay_ms: 20,
            multiplier: 1.0,
            jitter_factor: 0.0,
            overall_timeout_ms: 50,
        };
        let started = Instant::now();
        let mut calls = 0;
        let err = RetryController::new(policy)
            .run("test", &CancellationToken::new(), |_, _| -> Result<()> {
                calls += 1;
                Err(serialization_failure())
            })
            .unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { .. }));
        assert!(calls < 100);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_in_flight_attempt_finishes_past_deadline() {
        let policy = RetryPolicy {
            overall_timeout_ms: 10,
            ..fast_policy(3)
        };
        let result = RetryController::new(policy).run(
            "test",
            &CancellationToken::new(),
            |_, token| {
                std::thread::sleep(Duration::from_millis(30));
                assert!(!token.is_cancelled(), "attempt saw the retry deadline");
                Ok("done")
            },
        );
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn test_caller_cancellation_reaches_attempt() {
        let caller = CancellationToken::new();
        let result = RetryController::new(fast_policy(3)).run("test", &caller, |_, token| {
            caller.cancel();
            Ok(token.is_cancelled())
        });
        assert!(result.unwrap());
    }

    #[test]
    fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let mut calls = 0;
        let err = RetryController::new(fast_policy(3))
            .run("test", &token, |_, _| -> Result<()> {
                calls += 1;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_metrics_hook() {
        let metrics = Metrics::new().unwrap();
        let mut calls = 0;
        RetryController::new(fast_policy(5))
            .with_metrics(metrics.clone())
            .run("test", &CancellationToken::new(), |_, _| {
                calls += 1;
                if calls < 3 {
                    Err(serialization_failure())
                } else {
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(metrics.retries_total.get(), 2);
        assert_eq!(metrics.contention_total.get(), 2);
    }

    #[test]
    fn test_free_function() {
        let mut calls = 0;
        let value = run_with_retry(
            |_| {
                calls += 1;
                if calls == 1 {
                    Err(serialization_failure())
                } else {
                    Ok(7)
                }
            },
            3,
            Duration::from_millis(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls, 2);
    }
}
