//! helm-errors — the error taxonomy and error router shared across the
//! helmsman DB shell runtime (spec.md §4.G, §7).
//!
//! Every other `helm-*` crate returns [`HelmError`] at its public
//! boundaries; the [`ErrorRouter`] is how the CLI and the pipeline/workflow
//! engines turn a raw error into a recovery decision instead of just
//! propagating it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod context;
mod error;
mod router;
mod strategy;

pub use context::{ErrorContext, Origin};
pub use error::{ErrorKind, HelmError, HelmResult};
pub use router::{ErrorRouter, HistoryEntry};
pub use strategy::{
    FatalStrategy, NetworkRetryStrategy, RateLimitBackoffStrategy, RecoveryAction,
    RecoveryStrategy, TimeoutRetryStrategy, ValidationFallbackStrategy,
};

/// Builds an [`ErrorRouter`] pre-populated with the four built-in
/// strategies described in spec.md §4.G, in the priority order: rate-limit
/// backoff, network retry, timeout retry, validation fallback, with fatal
/// errors always winning.
#[must_use]
pub fn default_router(retry_policy: helm_core::RetryPolicy) -> ErrorRouter {
    ErrorRouter::new()
        .with_strategy(FatalStrategy)
        .with_strategy(RateLimitBackoffStrategy::new(retry_policy.clone()))
        .with_strategy(NetworkRetryStrategy::new(retry_policy.clone()))
        .with_strategy(TimeoutRetryStrategy::new(retry_policy.clone()))
        .with_strategy(ValidationFallbackStrategy::new("defaults"))
}
