//! Recovery strategies: the router's ordered matching rules.

use std::time::Duration;

use helm_core::RetryPolicy;

use crate::context::{ErrorContext, Origin};
use crate::error::{ErrorKind, HelmError};

/// What the router decided to do about an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Retry the operation after the given delay.
    Retry {
        /// Delay before the next attempt.
        after: Duration,
    },
    /// Don't retry; use a fallback value/path instead. The strategy name is
    /// carried so callers can tell which fallback fired.
    Fallback {
        /// Name of the fallback path chosen.
        name: String,
    },
    /// Surface the error to the caller unchanged; no strategy applies or all
    /// applicable strategies declined to recover.
    Surface,
    /// The error is fatal: stop retrying and propagate immediately,
    /// regardless of remaining attempts (e.g. `CircularDependency`).
    Fatal,
}

/// A single recovery rule. Strategies are tried in descending `priority()`
/// order; the first whose `matches` returns true wins.
pub trait RecoveryStrategy: Send + Sync {
    /// Human-readable name, used in logs and as the `Fallback` action's name.
    fn name(&self) -> &str;

    /// Relative priority; higher runs first. Ties break in registration
    /// order.
    fn priority(&self) -> i32;

    /// Whether this strategy applies to the given error/context pair.
    fn matches(&self, error: &HelmError, ctx: &ErrorContext) -> bool;

    /// Decide the recovery action. Only called when `matches` returned true.
    fn apply(&self, error: &HelmError, ctx: &ErrorContext) -> RecoveryAction;
}

/// Retries network-ish failures (broken pipe, connection lost, spawn
/// failure) with exponential backoff, scoped to the MCP origin.
pub struct NetworkRetryStrategy {
    policy: RetryPolicy,
}

impl NetworkRetryStrategy {
    /// Build the strategy from a retry policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl RecoveryStrategy for NetworkRetryStrategy {
    fn name(&self) -> &str {
        "network-retry"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn matches(&self, error: &HelmError, ctx: &ErrorContext) -> bool {
        matches!(ctx.origin, Some(Origin::Mcp) | None)
            && matches!(
                error.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionLost | ErrorKind::SpawnFailed
            )
    }

    fn apply(&self, _error: &HelmError, ctx: &ErrorContext) -> RecoveryAction {
        if self.policy.should_retry(ctx.attempts_made) {
            RecoveryAction::Retry {
                after: self.policy.delay_for_attempt(ctx.attempts_made + 1),
            }
        } else {
            RecoveryAction::Surface
        }
    }
}

/// Retries operations that merely timed out, with a flatter backoff than
/// network failures since a timeout often just means "try again now".
pub struct TimeoutRetryStrategy {
    policy: RetryPolicy,
}

impl TimeoutRetryStrategy {
    /// Build the strategy from a retry policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl RecoveryStrategy for TimeoutRetryStrategy {
    fn name(&self) -> &str {
        "timeout-retry"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn matches(&self, error: &HelmError, _ctx: &ErrorContext) -> bool {
        error.kind() == ErrorKind::Timeout
    }

    fn apply(&self, _error: &HelmError, ctx: &ErrorContext) -> RecoveryAction {
        if self.policy.should_retry(ctx.attempts_made) {
            RecoveryAction::Retry {
                after: self.policy.delay_for_attempt(ctx.attempts_made + 1),
            }
        } else {
            RecoveryAction::Surface
        }
    }
}

/// Backs off on `RateLimited`, honoring the server's `Retry-After` hint when
/// present instead of the policy's own schedule.
pub struct RateLimitBackoffStrategy {
    policy: RetryPolicy,
}

impl RateLimitBackoffStrategy {
    /// Build the strategy from a retry policy used when no `Retry-After`
    /// hint is available.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl RecoveryStrategy for RateLimitBackoffStrategy {
    fn name(&self) -> &str {
        "rate-limit-backoff"
    }

    fn priority(&self) -> i32 {
        110
    }

    fn matches(&self, error: &HelmError, _ctx: &ErrorContext) -> bool {
        error.kind() == ErrorKind::RateLimited
    }

    fn apply(&self, error: &HelmError, ctx: &ErrorContext) -> RecoveryAction {
        if !self.policy.should_retry(ctx.attempts_made) {
            return RecoveryAction::Surface;
        }
        let hint = match error {
            HelmError::RateLimited { retry_after } => *retry_after,
            _ => None,
        };
        let after = hint
            .or(ctx.retry_after_hint)
            .unwrap_or_else(|| self.policy.delay_for_attempt(ctx.attempts_made + 1));
        RecoveryAction::Retry { after }
    }
}

/// Validation-shaped failures never retry; they fall back to a named
/// default path (e.g. "use last-known-good state") instead.
pub struct ValidationFallbackStrategy {
    fallback_name: String,
}

impl ValidationFallbackStrategy {
    /// Build the strategy with the name of the fallback path it selects.
    #[must_use]
    pub fn new(fallback_name: impl Into<String>) -> Self {
        Self {
            fallback_name: fallback_name.into(),
        }
    }
}

impl RecoveryStrategy for ValidationFallbackStrategy {
    fn name(&self) -> &str {
        "validation-fallback"
    }

    fn priority(&self) -> i32 {
        80
    }

    fn matches(&self, error: &HelmError, _ctx: &ErrorContext) -> bool {
        matches!(error.kind(), ErrorKind::SchemaError | ErrorKind::Config)
    }

    fn apply(&self, _error: &HelmError, _ctx: &ErrorContext) -> RecoveryAction {
        RecoveryAction::Fallback {
            name: self.fallback_name.clone(),
        }
    }
}

/// Errors that can never be recovered from, regardless of retry budget.
pub struct FatalStrategy;

impl RecoveryStrategy for FatalStrategy {
    fn name(&self) -> &str {
        "fatal"
    }

    fn priority(&self) -> i32 {
        1000
    }

    fn matches(&self, error: &HelmError, _ctx: &ErrorContext) -> bool {
        matches!(
            error.kind(),
            ErrorKind::CircularDependency | ErrorKind::AuditChainBroken
        )
    }

    fn apply(&self, _error: &HelmError, _ctx: &ErrorContext) -> RecoveryAction {
        RecoveryAction::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rate_limit_honors_hint_over_policy() {
        let strategy = RateLimitBackoffStrategy::new(RetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
        ));
        let error = HelmError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        let ctx = ErrorContext::new(Origin::Mcp);
        assert!(strategy.matches(&error, &ctx));
        assert_eq!(
            strategy.apply(&error, &ctx),
            RecoveryAction::Retry {
                after: Duration::from_secs(3)
            }
        );
    }

    #[test]
    fn fatal_strategy_overrides_retry() {
        let strategy = FatalStrategy;
        let error = HelmError::CircularDependency;
        let ctx = ErrorContext::default();
        assert!(strategy.matches(&error, &ctx));
        assert_eq!(strategy.apply(&error, &ctx), RecoveryAction::Fatal);
    }
}
