//! A single pipeline stage: its behavior, retry policy, and optional
//! recovery function (spec.md §4.J).

use std::sync::Arc;

use async_trait::async_trait;
use helm_core::{Priority, RetryPolicy};
use helm_errors::HelmError;
use serde_json::Value;

/// One unit of work in a pipeline. Receives the previous stage's output (or
/// the pipeline's input, for the first stage) and produces the next stage's
/// input.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Run the stage.
    async fn run(&self, input: Value) -> Result<Value, HelmError>;
}

/// A boxed closure adapter so simple stages don't need a named type.
pub struct FnStage<F>(pub F);

#[async_trait]
impl<F, Fut> Stage for FnStage<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, HelmError>> + Send,
{
    async fn run(&self, input: Value) -> Result<Value, HelmError> {
        (self.0)(input).await
    }
}

/// A function that converts a stage's exhausted-retry error into a
/// replacement output value, letting the pipeline continue instead of
/// failing.
pub type RecoveryFn = Arc<dyn Fn(&HelmError) -> Option<Value> + Send + Sync>;

/// A stage plus its scheduling metadata: declared priority (pipelines order
/// stages by this, highest first), retry policy, and optional recovery.
pub struct PipelineStage {
    /// Stage name, used in `StageFailed` envelopes and metrics.
    pub name: String,
    /// Declared priority; determines execution order among the pipeline's
    /// stages (ties keep declaration order).
    pub priority: Priority,
    /// Retry policy for transient failures.
    pub retry_policy: RetryPolicy,
    /// Converts an exhausted-retry error into a fallback output instead of
    /// failing the pipeline.
    pub recovery: Option<RecoveryFn>,
    /// The stage's behavior.
    pub stage: Arc<dyn Stage>,
}

impl PipelineStage {
    /// Build a stage with the default (no-retry) policy and no recovery.
    #[must_use]
    pub fn new(name: impl Into<String>, priority: Priority, stage: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            priority,
            retry_policy: RetryPolicy::no_retry(),
            recovery: None,
            stage,
        }
    }

    /// Builder-style retry policy setter.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Builder-style recovery function setter.
    #[must_use]
    pub fn with_recovery(mut self, recovery: RecoveryFn) -> Self {
        self.recovery = Some(recovery);
        self
    }
}
