//! Per-pipeline and per-stage execution metrics (spec.md §4.J).

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

#[derive(Default)]
struct Accumulator {
    count: u64,
    failures: u64,
    total_duration: Duration,
}

impl Accumulator {
    fn record(&mut self, duration: Duration, failed: bool) {
        self.count += 1;
        if failed {
            self.failures += 1;
        }
        self.total_duration += duration;
    }

    fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / u32::try_from(self.count).unwrap_or(u32::MAX)
        }
    }
}

/// Snapshot of a single stage's accumulated metrics.
#[derive(Debug, Clone, Default)]
pub struct StageMetricsSnapshot {
    /// Number of times the stage was attempted (one per pipeline run it
    /// participated in, not per retry attempt).
    pub executions: u64,
    /// Number of those executions that ultimately failed (after retries and
    /// any recovery).
    pub failures: u64,
    /// Average wall-clock duration across executions, including retries.
    pub average_duration: Duration,
}

/// Snapshot of a pipeline's accumulated metrics.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetricsSnapshot {
    /// Total number of `execute`/`execute_stream` runs.
    pub total_runs: u64,
    /// Runs that completed every stage successfully.
    pub successes: u64,
    /// Runs that failed at some stage.
    pub failures: u64,
    /// Runs that were aborted before completion.
    pub aborts: u64,
    /// Average wall-clock duration across all runs.
    pub average_duration: Duration,
    /// Per-stage breakdown, keyed by stage name.
    pub per_stage: HashMap<String, StageMetricsSnapshot>,
}

impl PipelineMetricsSnapshot {
    /// Fraction of runs, in `[0.0, 1.0]`, that succeeded.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.successes as f64 / self.total_runs as f64
        }
    }
}

/// Outcome of a single run, used to update the accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every stage succeeded.
    Success,
    /// A stage failed after exhausting retries with no recovery.
    Failure,
    /// The run was aborted.
    Aborted,
}

pub(crate) struct MetricsState {
    pipeline: Mutex<Accumulator>,
    aborts: std::sync::atomic::AtomicU64,
    stages: Mutex<HashMap<String, Accumulator>>,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self {
            pipeline: Mutex::new(Accumulator::default()),
            aborts: std::sync::atomic::AtomicU64::new(0),
            stages: Mutex::new(HashMap::new()),
        }
    }
}

impl MetricsState {
    pub(crate) fn record_run(&self, duration: Duration, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Aborted => {
                self.aborts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            RunOutcome::Success => self.pipeline.lock().record(duration, false),
            RunOutcome::Failure => self.pipeline.lock().record(duration, true),
        }
    }

    pub(crate) fn record_stage(&self, name: &str, duration: Duration, failed: bool) {
        self.stages.lock().entry(name.to_string()).or_default().record(duration, failed);
    }

    pub(crate) fn snapshot(&self) -> PipelineMetricsSnapshot {
        let pipeline = self.pipeline.lock();
        let aborts = self.aborts.load(std::sync::atomic::Ordering::SeqCst);
        let per_stage = self
            .stages
            .lock()
            .iter()
            .map(|(name, acc)| {
                (
                    name.clone(),
                    StageMetricsSnapshot {
                        executions: acc.count,
                        failures: acc.failures,
                        average_duration: acc.average(),
                    },
                )
            })
            .collect();
        PipelineMetricsSnapshot {
            total_runs: pipeline.count + aborts,
            successes: pipeline.count - pipeline.failures,
            failures: pipeline.failures,
            aborts,
            average_duration: pipeline.average(),
            per_stage,
        }
    }
}
