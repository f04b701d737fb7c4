//! The pipeline engine: sequential stage execution, per-stage retry and
//! recovery, streaming intermediate results, and cooperative abort
//! (spec.md §4.J).

use std::time::{Duration, Instant};

use helm_core::{retry_with_policy, RetryOutcome};
use helm_errors::HelmError;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::metrics::{MetricsState, PipelineMetricsSnapshot, RunOutcome};
use crate::stage::PipelineStage;

/// An event emitted by [`Pipeline::execute_stream`] after each stage
/// completes (or the run ends).
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// A stage finished successfully (possibly via recovery).
    StageCompleted {
        /// The stage's name.
        stage: String,
        /// Its output, which becomes the next stage's input.
        intermediate_result: Value,
    },
    /// The run was aborted before or during this stage.
    Aborted {
        /// The stage that was running (or about to run) when aborted.
        stage: String,
    },
    /// The run failed at this stage with no recovery available.
    Failed {
        /// The stage that failed.
        stage: String,
        /// The failure.
        error: HelmError,
    },
    /// Every stage completed; this is the last event of a successful run.
    Finished {
        /// The final stage's output.
        output: Value,
    },
}

/// An ordered list of stages executed sequentially.
pub struct Pipeline {
    name: String,
    stages: Vec<PipelineStage>,
    metrics: MetricsState,
}

/// Builds a [`Pipeline`], sorting stages by declared priority (highest
/// first, ties keeping declaration order).
#[derive(Default)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<PipelineStage>,
}

impl PipelineBuilder {
    /// Start building a pipeline with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage.
    #[must_use]
    pub fn add_stage(mut self, stage: PipelineStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Finalize the pipeline, ordering stages by declared priority.
    #[must_use]
    pub fn build(mut self) -> Pipeline {
        self.stages.sort_by(|a, b| b.priority.cmp(&a.priority));
        Pipeline {
            name: self.name,
            stages: self.stages,
            metrics: MetricsState::default(),
        }
    }
}

impl Pipeline {
    /// The pipeline's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A snapshot of accumulated metrics.
    #[must_use]
    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run every stage in order, feeding each stage's output to the next.
    pub async fn execute(&self, input: Value, cancel: CancellationToken) -> Result<Value, HelmError> {
        let start = Instant::now();
        let mut value = input;

        for stage in &self.stages {
            if cancel.is_cancelled() {
                self.metrics.record_run(start.elapsed(), RunOutcome::Aborted);
                return Err(HelmError::Cancelled);
            }

            match self.run_stage(stage, value, &cancel).await {
                StageResult::Output(next) => value = next,
                StageResult::Aborted => {
                    self.metrics.record_run(start.elapsed(), RunOutcome::Aborted);
                    return Err(HelmError::Cancelled);
                }
                StageResult::Failed(error) => {
                    self.metrics.record_run(start.elapsed(), RunOutcome::Failure);
                    return Err(error);
                }
            }
        }

        self.metrics.record_run(start.elapsed(), RunOutcome::Success);
        Ok(value)
    }

    /// Run every stage, emitting a [`StageEvent`] after each one completes.
    /// The returned receiver yields a finite, non-restartable sequence that
    /// ends with `Finished`, `Aborted`, or `Failed`.
    #[must_use]
    pub fn execute_stream(self: std::sync::Arc<Self>, input: Value, cancel: CancellationToken) -> mpsc::Receiver<StageEvent> {
        let (tx, rx) = mpsc::channel(self.stages.len().max(1) + 1);
        tokio::spawn(async move {
            let start = Instant::now();
            let mut value = input;

            for stage in &self.stages {
                if cancel.is_cancelled() {
                    self.metrics.record_run(start.elapsed(), RunOutcome::Aborted);
                    let _ = tx.send(StageEvent::Aborted { stage: stage.name.clone() }).await;
                    return;
                }

                match self.run_stage(stage, value.clone(), &cancel).await {
                    StageResult::Output(next) => {
                        value = next.clone();
                        if tx
                            .send(StageEvent::StageCompleted {
                                stage: stage.name.clone(),
                                intermediate_result: next,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    StageResult::Aborted => {
                        self.metrics.record_run(start.elapsed(), RunOutcome::Aborted);
                        let _ = tx.send(StageEvent::Aborted { stage: stage.name.clone() }).await;
                        return;
                    }
                    StageResult::Failed(error) => {
                        self.metrics.record_run(start.elapsed(), RunOutcome::Failure);
                        let _ = tx
                            .send(StageEvent::Failed {
                                stage: stage.name.clone(),
                                error,
                            })
                            .await;
                        return;
                    }
                }
            }

            self.metrics.record_run(start.elapsed(), RunOutcome::Success);
            let _ = tx.send(StageEvent::Finished { output: value }).await;
        });
        rx
    }

    async fn run_stage(&self, stage: &PipelineStage, input: Value, cancel: &CancellationToken) -> StageResult {
        let stage_start = Instant::now();
        let outcome = tokio::select! {
            outcome = retry_with_policy(
                &stage.retry_policy,
                |_attempt| {
                    let stage = &stage.stage;
                    let input = input.clone();
                    async move { stage.run(input).await }
                },
                HelmError::is_transient,
            ) => outcome,
            () = cancel.cancelled() => RetryOutcome::Aborted,
        };

        match outcome {
            RetryOutcome::Success(value) => {
                self.metrics.record_stage(&stage.name, stage_start.elapsed(), false);
                StageResult::Output(value)
            }
            RetryOutcome::Aborted => StageResult::Aborted,
            RetryOutcome::Exhausted { error, .. } => {
                if let Some(recovery) = &stage.recovery {
                    if let Some(value) = recovery(&error) {
                        self.metrics.record_stage(&stage.name, stage_start.elapsed(), false);
                        return StageResult::Output(value);
                    }
                }
                self.metrics.record_stage(&stage.name, stage_start.elapsed(), true);
                warn!(stage = %stage.name, error = %error, "stage failed after exhausting retries");
                StageResult::Failed(HelmError::StageFailed {
                    name: stage.name.clone(),
                    reason: error.to_string(),
                })
            }
        }
    }
}

enum StageResult {
    Output(Value),
    Aborted,
    Failed(HelmError),
}

#[allow(dead_code)]
fn _assert_average_duration_type(_: Duration) {}
