//! Retry and exponential-backoff utilities shared by the MCP client's
//! reconnect logic, the pipeline engine's per-stage retries, and the
//! workflow orchestrator's per-step retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry behavior with exponential backoff.
///
/// The delay for the k-th retry is `min(max_delay, initial_delay *
/// multiplier^(k-1))`, optionally perturbed by `±jitter_factor` (see
/// spec.md §4.C "Reconnection").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt).
    pub max_attempts: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps the exponential growth).
    pub max_delay: Duration,
    /// Multiplier applied per attempt (typically 2.0).
    pub multiplier: f64,
    /// Jitter factor in `[0.0, 1.0]`; 0 disables jitter.
    #[serde(default)]
    pub jitter: f64,
}

impl RetryPolicy {
    /// Create a new retry policy.
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier,
            jitter: 0.0,
        }
    }

    /// A policy with no retries — the operation runs exactly once.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// Sets the jitter factor and returns self for builder-style configuration.
    #[must_use]
    pub const fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = factor;
        self
    }

    /// Delay before the k-th retry (`attempt` is 1-indexed: `attempt=1` is
    /// the first retry after the initial try). `attempt=0` returns zero.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms.max(0.0) as u64)
    }

    /// Delay for the k-th retry with jitter applied, given a random draw in
    /// `[0.0, 1.0]` from the caller (so the policy itself stays deterministic
    /// and testable).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt_with_jitter(&self, attempt: u32, random_draw: f64) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let random_draw = random_draw.clamp(0.0, 1.0);
        let multiplier = 1.0 - self.jitter + (2.0 * self.jitter * random_draw);
        let jittered_ms = base.as_millis() as f64 * multiplier;
        Duration::from_millis(jittered_ms.max(0.0) as u64)
    }

    /// Whether another attempt is permitted given the number of attempts
    /// already made.
    #[must_use]
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Sum of all scheduled retry delays; used by property tests to bound
    /// total reconnection time (spec.md §8 invariant 10).
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        (1..=self.max_attempts)
            .map(|a| self.delay_for_attempt(a))
            .sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(10), 2.0)
    }
}

/// Outcome of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// Operation succeeded, possibly after some retries.
    Success(T),
    /// All attempts failed.
    Exhausted {
        /// The final error observed.
        error: E,
        /// Total number of attempts made (including the first).
        attempts: u32,
    },
    /// The operation was aborted (e.g. cancellation) before completing.
    Aborted,
}

impl<T, E> RetryOutcome<T, E> {
    /// True if the operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Run `operation` with retry per `policy`. `should_retry` may veto a retry
/// for a non-transient error (e.g. validation failures never retry).
pub async fn retry_with_policy<T, E, Fut, F, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return RetryOutcome::Success(value),
            Err(error) => {
                if !policy.should_retry(attempt) || !should_retry(&error) {
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt + 1,
                    };
                }
                attempt += 1;
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_s2_backoff_schedule() {
        // S2: initial=100ms, mult=2, maxDelay=1s, jitter=0.
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1), 2.0);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn delay_caps_at_max() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(500), 2.0);
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn no_retry_never_retries() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(0));
        assert_eq!(policy.total_delay(), Duration::ZERO);
    }

    #[test]
    fn jitter_bounds_the_delay() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(10), 2.0)
            .with_jitter(0.1);
        let base = policy.delay_for_attempt(1);
        let low = policy.delay_for_attempt_with_jitter(1, 0.0);
        let high = policy.delay_for_attempt_with_jitter(1, 1.0);
        assert!(low < base);
        assert!(high > base);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(10), 2.0);
        let outcome = retry_with_policy(
            &policy,
            |attempt| async move {
                if attempt < 2 {
                    Err("transient")
                } else {
                    Ok("recovered")
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(outcome, RetryOutcome::Success("recovered"));
    }

    #[tokio::test]
    async fn retry_exhausts_after_max_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(10), 2.0);
        let outcome = retry_with_policy(
            &policy,
            |_attempt| async { Err::<(), _>("always fails") },
            |_| true,
        )
        .await;
        assert!(matches!(
            outcome,
            RetryOutcome::Exhausted {
                error: "always fails",
                attempts: 3
            }
        ));
    }

    #[tokio::test]
    async fn non_retryable_error_aborts_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(10), 2.0);
        let outcome = retry_with_policy(
            &policy,
            |_attempt| async { Err::<(), _>("permanent") },
            |_| false,
        )
        .await;
        assert!(matches!(
            outcome,
            RetryOutcome::Exhausted { attempts: 1, .. }
        ));
    }
}
