//! A single workflow step: its kind, dependencies, and retry/failure
//! policy (spec.md §4.K).

use std::sync::Arc;

use futures::future::BoxFuture;
use helm_core::RetryPolicy;
use helm_errors::HelmError;
use serde_json::Value;

/// A caller-supplied closure run by a `custom` step.
pub type CustomStepFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, HelmError>> + Send + Sync>;

/// The behavior a step performs, resolved against the template context
/// before running.
#[derive(Clone)]
pub enum StepKind {
    /// Calls `pool.callTool(tool, params)`.
    Tool {
        /// Tool name, or `server:tool` for an unambiguous reference.
        tool: String,
        /// Template parameters resolved before the call.
        params: Value,
    },
    /// Calls out through the external LLM interface. The request/response
    /// shape is modeled; dispatching to a concrete provider is out of
    /// scope here.
    Llm {
        /// Template request payload.
        request: Value,
    },
    /// Evaluates `predicate` against the template context (truthy per
    /// [`serde_json::Value::as_bool`], defaulting to `false` for
    /// non-boolean results) and selects a child step accordingly.
    Conditional {
        /// Template predicate.
        predicate: Value,
        /// Step id to run if the predicate is true.
        when_true: String,
        /// Step id to run if the predicate is false, if any.
        when_false: Option<String>,
    },
    /// Runs a declared list of child steps concurrently and gathers their
    /// outputs into an array, in declaration order.
    Parallel {
        /// Ids of steps to run concurrently. Must also appear as ordinary
        /// steps in the workflow so their own dependencies and kind are
        /// defined once.
        children: Vec<String>,
    },
    /// A caller-supplied closure.
    Custom(CustomStepFn),
}

/// One node in a workflow's dependency graph.
#[derive(Clone)]
pub struct WorkflowStep {
    /// Unique step id within the workflow.
    pub id: String,
    /// What the step does.
    pub kind: StepKind,
    /// Ids of steps that must complete before this one starts.
    pub depends_on: Vec<String>,
    /// Retry policy for this step's execution.
    pub retry_policy: RetryPolicy,
    /// If true, a step that fails after exhausting retries does not fail
    /// the workflow; its output becomes an error envelope instead.
    pub continue_on_error: bool,
}

impl WorkflowStep {
    /// Build a step with no dependencies, no retries, and
    /// `continue_on_error: false`.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            depends_on: Vec::new(),
            retry_policy: RetryPolicy::no_retry(),
            continue_on_error: false,
        }
    }

    /// Builder-style dependency setter.
    #[must_use]
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style retry policy setter.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Builder-style `continue_on_error` setter.
    #[must_use]
    pub fn continue_on_error(mut self, value: bool) -> Self {
        self.continue_on_error = value;
        self
    }
}

/// A step's recorded outcome, visible to dependents via
/// `steps.<id>.output`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutput {
    /// The step produced a value.
    Ok {
        /// The step's result.
        output: Value,
    },
    /// The step failed and `continue_on_error` let the workflow proceed.
    Error {
        /// The failure's message.
        error: String,
    },
}

impl StepOutput {
    /// The value dependents see regardless of outcome.
    #[must_use]
    pub fn as_value(&self) -> Value {
        match self {
            Self::Ok { output } => output.clone(),
            Self::Error { error } => serde_json::json!({ "error": error }),
        }
    }
}
