//! The error router: classification plus ordered recovery strategies
//! (spec.md §4.G).

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::warn;

use crate::context::ErrorContext;
use crate::error::{ErrorKind, HelmError};
use crate::strategy::{RecoveryAction, RecoveryStrategy};

const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// One entry in the router's bounded history ring.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// The error's classification.
    pub kind: ErrorKind,
    /// Human-readable description, from `Display`.
    pub message: String,
    /// What the router decided to do.
    pub action: RecoveryAction,
}

struct RouterState {
    history: VecDeque<HistoryEntry>,
    history_capacity: usize,
    counts_by_kind: HashMap<ErrorKind, u64>,
}

/// Classifies errors and routes them through an ordered set of recovery
/// strategies, keeping a bounded history and per-kind counters for
/// diagnostics.
pub struct ErrorRouter {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
    state: Mutex<RouterState>,
}

impl ErrorRouter {
    /// An empty router: every error surfaces unchanged. Use
    /// [`ErrorRouter::with_strategy`] to add rules, or
    /// [`ErrorRouter::with_defaults`] for the built-in set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            state: Mutex::new(RouterState {
                history: VecDeque::with_capacity(DEFAULT_HISTORY_CAPACITY),
                history_capacity: DEFAULT_HISTORY_CAPACITY,
                counts_by_kind: HashMap::new(),
            }),
        }
    }

    /// Registers a strategy. Strategies are re-sorted by descending
    /// priority after every insertion, with ties kept in registration
    /// order.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl RecoveryStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self.strategies
            .sort_by_key(|s| std::cmp::Reverse(s.priority()));
        self
    }

    /// Sets the bounded history capacity (default 256 entries).
    #[must_use]
    pub fn with_history_capacity(self, capacity: usize) -> Self {
        {
            let mut state = self.state.lock();
            state.history_capacity = capacity.max(1);
            while state.history.len() > state.history_capacity {
                state.history.pop_front();
            }
        }
        self
    }

    /// Classify an error into its [`ErrorKind`]. A thin wrapper kept as its
    /// own method so callers can classify without going through `handle`.
    #[must_use]
    pub fn classify(&self, error: &HelmError) -> ErrorKind {
        error.kind()
    }

    /// Route an error: find the highest-priority matching strategy, apply
    /// it, and record the outcome in the history and counters. Returns
    /// [`RecoveryAction::Surface`] when no strategy matches.
    pub fn handle(&self, error: &HelmError, ctx: &ErrorContext) -> RecoveryAction {
        let kind = error.kind();
        let action = self
            .strategies
            .iter()
            .find(|s| s.matches(error, ctx))
            .map_or(RecoveryAction::Surface, |s| {
                let action = s.apply(error, ctx);
                if matches!(action, RecoveryAction::Surface) {
                    warn!(strategy = s.name(), %error, "recovery strategy declined");
                }
                action
            });

        let mut state = self.state.lock();
        *state.counts_by_kind.entry(kind).or_insert(0) += 1;
        if state.history.len() >= state.history_capacity {
            state.history.pop_front();
        }
        state.history.push_back(HistoryEntry {
            kind,
            message: error.to_string(),
            action: action.clone(),
        });
        action
    }

    /// Snapshot of the bounded history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Count of errors seen of a given kind since the router was created or
    /// last reset.
    #[must_use]
    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.state.lock().counts_by_kind.get(&kind).copied().unwrap_or(0)
    }

    /// Total errors routed.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.state.lock().counts_by_kind.values().sum()
    }

    /// Clears history and counters; strategies are unaffected.
    pub fn reset_stats(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        state.counts_by_kind.clear();
    }
}

impl Default for ErrorRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Origin;
    use crate::strategy::{
        FatalStrategy, NetworkRetryStrategy, RateLimitBackoffStrategy, TimeoutRetryStrategy,
        ValidationFallbackStrategy,
    };
    use helm_core::RetryPolicy;
    use std::time::Duration;

    fn router() -> ErrorRouter {
        ErrorRouter::new()
            .with_strategy(FatalStrategy)
            .with_strategy(RateLimitBackoffStrategy::new(RetryPolicy::default()))
            .with_strategy(NetworkRetryStrategy::new(RetryPolicy::default()))
            .with_strategy(TimeoutRetryStrategy::new(RetryPolicy::default()))
            .with_strategy(ValidationFallbackStrategy::new("defaults"))
    }

    #[test]
    fn unmatched_errors_surface() {
        let router = router();
        let action = router.handle(&HelmError::Cancelled, &ErrorContext::default());
        assert_eq!(action, RecoveryAction::Surface);
    }

    #[test]
    fn network_error_retries() {
        let router = router();
        let ctx = ErrorContext::new(Origin::Mcp);
        let error = HelmError::BrokenPipe {
            server: "db".into(),
        };
        assert!(matches!(
            router.handle(&error, &ctx),
            RecoveryAction::Retry { .. }
        ));
        assert_eq!(router.count(ErrorKind::BrokenPipe), 1);
    }

    #[test]
    fn fatal_beats_everything_else_by_priority() {
        let router = router();
        let action = router.handle(&HelmError::CircularDependency, &ErrorContext::default());
        assert_eq!(action, RecoveryAction::Fatal);
    }

    #[test]
    fn history_is_bounded() {
        let router = router().with_history_capacity(2);
        for _ in 0..5 {
            router.handle(&HelmError::Cancelled, &ErrorContext::default());
        }
        assert_eq!(router.history().len(), 2);
        assert_eq!(router.total_count(), 5);
    }

    #[test]
    fn exhausted_retry_budget_surfaces() {
        let router = ErrorRouter::new().with_strategy(TimeoutRetryStrategy::new(
            RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(5), 2.0),
        ));
        let ctx = ErrorContext::new(Origin::Mcp).with_attempts(1);
        let action = router.handle(&HelmError::Timeout(Duration::from_secs(1)), &ctx);
        assert_eq!(action, RecoveryAction::Surface);
    }
}
