//! The workflow engine: group scheduling, template-bound step dispatch,
//! retry/`continue_on_error`, abort propagation, and checkpointing
//! (spec.md §4.K).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use helm_core::{retry_with_policy, Priority, RetryOutcome, SnapshotId, WorkflowRunId};
use helm_errors::HelmError;
use helm_events::EventBus;
use helm_mcp::ClientPool;
use helm_state::{SetOptions, StateStore};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::graph::topological_groups;
use crate::step::{StepKind, StepOutput, WorkflowStep};
use crate::template::{resolve_template, TemplateContext};

/// External LLM interface an `llm` step dispatches through. Out of scope
/// beyond the request/response shape (spec.md §4.K).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a resolved request, returning the provider's response.
    async fn complete(&self, request: Value) -> Result<Value, HelmError>;
}

/// A point-in-time record emitted at a step boundary so a durable store
/// can let a long-running workflow survive a restart.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// The run this checkpoint belongs to.
    pub workflow_run: WorkflowRunId,
    /// The step that just completed.
    pub step_id: String,
    /// Every step's output recorded so far.
    pub outputs_so_far: HashMap<String, StepOutput>,
    /// The state store snapshot taken at this boundary.
    pub state_snapshot: SnapshotId,
}

/// Receives checkpoints. The core only calls this hook; durable
/// persistence is the caller's responsibility.
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    /// Persist (or otherwise record) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint);
}

/// Lifecycle events published on a workflow's event bus.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A step completed successfully.
    StepCompleted {
        /// The step's id.
        step: String,
    },
    /// A step failed but `continue_on_error` let the run proceed.
    StepFailedContinuing {
        /// The step's id.
        step: String,
        /// The failure.
        error: String,
    },
    /// The run failed at a step with no `continue_on_error`.
    RunFailed {
        /// The step that failed.
        step: String,
        /// The failure.
        error: String,
    },
    /// The run was aborted.
    RunAborted,
    /// Every step completed.
    RunFinished,
}

/// A DAG of steps, resolved and ready to execute.
pub struct Workflow {
    name: String,
    groups: Vec<Vec<String>>,
    all_steps: HashMap<String, WorkflowStep>,
    concurrency: usize,
    pool: ClientPool,
    state: Arc<StateStore>,
    llm: Option<Arc<dyn LlmClient>>,
    checkpoint_sink: Option<Arc<dyn CheckpointSink>>,
    events: EventBus<WorkflowEvent>,
}

/// Builds a [`Workflow`], validating its dependency graph at `build()`.
pub struct WorkflowBuilder {
    name: String,
    steps: Vec<WorkflowStep>,
    concurrency: usize,
    pool: ClientPool,
    state: Arc<StateStore>,
    llm: Option<Arc<dyn LlmClient>>,
    checkpoint_sink: Option<Arc<dyn CheckpointSink>>,
}

impl WorkflowBuilder {
    /// Start building a workflow bound to the given tool pool and state
    /// store.
    #[must_use]
    pub fn new(name: impl Into<String>, pool: ClientPool, state: Arc<StateStore>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            concurrency: 8,
            pool,
            state,
            llm: None,
            checkpoint_sink: None,
        }
    }

    /// Append a step declaration (top-level or a `parallel` step's child).
    #[must_use]
    pub fn add_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Bound how many steps within one dependency group may run
    /// concurrently. Default 8.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Provide the interface `llm` steps dispatch through.
    #[must_use]
    pub fn with_llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(client);
        self
    }

    /// Provide a checkpoint sink, called at every step boundary.
    #[must_use]
    pub fn with_checkpoint_sink(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.checkpoint_sink = Some(sink);
        self
    }

    /// Validate the dependency graph (rejecting cycles and unknown
    /// dependencies) and build the workflow.
    pub fn build(self) -> Result<Workflow, HelmError> {
        let all_steps: HashMap<String, WorkflowStep> = self.steps.into_iter().map(|s| (s.id.clone(), s)).collect();

        let child_ids: HashSet<String> = all_steps
            .values()
            .flat_map(|s| -> Vec<String> {
                match &s.kind {
                    StepKind::Parallel { children } => children.clone(),
                    StepKind::Conditional { when_true, when_false, .. } => {
                        std::iter::once(when_true.clone()).chain(when_false.clone()).collect()
                    }
                    _ => Vec::new(),
                }
            })
            .collect();

        let top_level: Vec<WorkflowStep> = all_steps
            .values()
            .filter(|s| !child_ids.contains(&s.id))
            .cloned()
            .collect();

        let groups = topological_groups(&top_level)?;

        Ok(Workflow {
            name: self.name,
            groups,
            all_steps,
            concurrency: self.concurrency,
            pool: self.pool,
            state: self.state,
            llm: self.llm,
            checkpoint_sink: self.checkpoint_sink,
            events: EventBus::new(),
        })
    }
}

impl Workflow {
    /// The workflow's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> (helm_events::SubscriberId, Arc<helm_events::Inbox<WorkflowEvent>>) {
        self.events.subscribe()
    }

    /// Execute every step, grouped by dependency order, honoring
    /// `continue_on_error` and cooperative cancellation.
    pub async fn execute(&self, inputs: Value, cancel: CancellationToken) -> Result<HashMap<String, StepOutput>, HelmError> {
        self.state.set("input", inputs, SetOptions::none());
        let run_id = WorkflowRunId::new();
        let mut output_values: HashMap<String, Value> = HashMap::new();
        let mut results: HashMap<String, StepOutput> = HashMap::new();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        for group in &self.groups {
            if cancel.is_cancelled() {
                let _ = self.events.publish(WorkflowEvent::RunAborted, Priority::High).await;
                return Err(HelmError::Cancelled);
            }

            let snapshot = output_values.clone();
            let futures = group.iter().map(|id| {
                let semaphore = semaphore.clone();
                let snapshot = &snapshot;
                let cancel = cancel.clone();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                    let step = self.all_steps.get(id).expect("group member exists in all_steps");
                    let outcome = self.run_step(step, snapshot, &cancel).await;
                    (id.clone(), outcome)
                }
            });
            let completed = join_all(futures).await;

            for (id, outcome) in completed {
                let step = &self.all_steps[&id];
                match outcome {
                    Ok(value) => {
                        let _ = self
                            .events
                            .publish(WorkflowEvent::StepCompleted { step: id.clone() }, Priority::Normal)
                            .await;
                        results.insert(id.clone(), StepOutput::Ok { output: value.clone() });
                        output_values.insert(id.clone(), value);
                    }
                    Err(error) if step.continue_on_error => {
                        warn!(step = %id, error = %error, "step failed, continuing per continue_on_error");
                        let _ = self
                            .events
                            .publish(
                                WorkflowEvent::StepFailedContinuing {
                                    step: id.clone(),
                                    error: error.to_string(),
                                },
                                Priority::Normal,
                            )
                            .await;
                        let envelope = StepOutput::Error { error: error.to_string() };
                        output_values.insert(id.clone(), envelope.as_value());
                        results.insert(id.clone(), envelope);
                    }
                    Err(error) => {
                        if self
                            .events
                            .publish(
                                WorkflowEvent::RunFailed {
                                    step: id.clone(),
                                    error: error.to_string(),
                                },
                                Priority::Critical,
                            )
                            .await
                            .is_err()
                        {
                            warn!(step = %id, "run-failed notification missed its critical delivery deadline");
                        }
                        return Err(error);
                    }
                }

                if let Some(sink) = &self.checkpoint_sink {
                    let snapshot_id = self.state.snapshot(Some(format!("{} after {id}", self.name)));
                    sink.save(Checkpoint {
                        workflow_run: run_id,
                        step_id: id.clone(),
                        outputs_so_far: results.clone(),
                        state_snapshot: snapshot_id,
                    })
                    .await;
                }
            }
        }

        let _ = self.events.publish(WorkflowEvent::RunFinished, Priority::Normal).await;
        Ok(results)
    }

    fn run_step<'a>(
        &'a self,
        step: &'a WorkflowStep,
        snapshot: &'a HashMap<String, Value>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Value, HelmError>> {
        Box::pin(async move {
            let ctx = TemplateContext {
                step_outputs: snapshot,
                state: &self.state,
            };
            let outcome = tokio::select! {
                outcome = retry_with_policy(
                    &step.retry_policy,
                    |_attempt| self.dispatch(step, &ctx, cancel),
                    HelmError::is_transient,
                ) => outcome,
                () = cancel.cancelled() => RetryOutcome::Aborted,
            };
            match outcome {
                RetryOutcome::Success(value) => Ok(value),
                RetryOutcome::Aborted => Err(HelmError::Cancelled),
                RetryOutcome::Exhausted { error, .. } => Err(error),
            }
        })
    }

    async fn dispatch(&self, step: &WorkflowStep, ctx: &TemplateContext<'_>, cancel: &CancellationToken) -> Result<Value, HelmError> {
        match &step.kind {
            StepKind::Tool { tool, params } => {
                let resolved = resolve_template(params, ctx);
                self.pool.call_tool(tool, resolved).await
            }
            StepKind::Llm { request } => {
                let resolved = resolve_template(request, ctx);
                match &self.llm {
                    Some(client) => client.complete(resolved).await,
                    None => Err(HelmError::Config(format!("step {} has no llm client configured", step.id))),
                }
            }
            StepKind::Conditional {
                predicate,
                when_true,
                when_false,
            } => {
                let resolved = resolve_template(predicate, ctx);
                let branch = if resolved.as_bool().unwrap_or(false) {
                    Some(when_true)
                } else {
                    when_false.as_ref()
                };
                match branch {
                    Some(id) => {
                        let child = self
                            .all_steps
                            .get(id)
                            .ok_or_else(|| HelmError::DependencyFailed(format!("conditional branch {id} not found")))?;
                        self.run_step(child, ctx.step_outputs, cancel).await
                    }
                    None => Ok(Value::Null),
                }
            }
            StepKind::Parallel { children } => {
                let futures = children.iter().map(|id| async move {
                    let child = self
                        .all_steps
                        .get(id)
                        .ok_or_else(|| HelmError::DependencyFailed(format!("parallel child {id} not found")))?;
                    self.run_step(child, ctx.step_outputs, cancel).await
                });
                let results: Result<Vec<Value>, HelmError> = join_all(futures).await.into_iter().collect();
                results.map(Value::Array)
            }
            StepKind::Custom(f) => {
                let input = serde_json::to_value(ctx.step_outputs).unwrap_or(Value::Null);
                f(input).await
            }
        }
    }
}
