//! Ordered multi-stage pipeline engine: per-stage retry and recovery,
//! streaming intermediate results, cooperative abort, and metrics
//! (spec.md §4.J).

mod metrics;
mod pipeline;
mod stage;

pub use metrics::{PipelineMetricsSnapshot, RunOutcome, StageMetricsSnapshot};
pub use pipeline::{Pipeline, PipelineBuilder, StageEvent};
pub use stage::{FnStage, PipelineStage, RecoveryFn, Stage};

#[cfg(test)]
mod tests {
    use super::*;
    use helm_core::{Priority, RetryPolicy};
    use helm_errors::HelmError;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn stage_of(f: impl Fn(serde_json::Value) -> Result<serde_json::Value, HelmError> + Send + Sync + 'static) -> Arc<dyn Stage> {
        Arc::new(FnStage(move |input| {
            let result = f(input);
            async move { result }
        }))
    }

    #[tokio::test]
    async fn runs_stages_in_priority_order_feeding_output_forward() {
        let pipeline = PipelineBuilder::new("demo")
            .add_stage(PipelineStage::new(
                "low",
                Priority::Low,
                stage_of(|v| Ok(json!({ "value": v["value"].as_i64().unwrap_or(0) + 1 }))),
            ))
            .add_stage(PipelineStage::new(
                "high",
                Priority::High,
                stage_of(|v| Ok(json!({ "value": v["value"].as_i64().unwrap_or(0) * 10 }))),
            ))
            .build();

        let output = pipeline
            .execute(json!({ "value": 1 }), CancellationToken::new())
            .await
            .unwrap();

        // "high" runs first: (1 * 10) then +1 = 11.
        assert_eq!(output, json!({ "value": 11 }));
        let snapshot = pipeline.metrics();
        assert_eq!(snapshot.total_runs, 1);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.success_rate(), 1.0);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let pipeline = PipelineBuilder::new("flaky")
            .add_stage(
                PipelineStage::new(
                    "flaky",
                    Priority::Normal,
                    stage_of(move |v| {
                        let count = attempts_clone.fetch_add(1, Ordering::SeqCst);
                        if count < 2 {
                            Err(HelmError::BrokenPipe { server: "flaky".into() })
                        } else {
                            Ok(v)
                        }
                    }),
                )
                .with_retry_policy(RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(10), 2.0)),
            )
            .build();

        let output = pipeline.execute(json!(null), CancellationToken::new()).await.unwrap();
        assert_eq!(output, json!(null));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovery_function_substitutes_a_value_after_exhaustion() {
        let pipeline = PipelineBuilder::new("recoverable")
            .add_stage(
                PipelineStage::new(
                    "always-fails",
                    Priority::Normal,
                    stage_of(|_| Err(HelmError::Internal("boom".into()))),
                )
                .with_retry_policy(RetryPolicy::no_retry())
                .with_recovery(Arc::new(|_err| Some(json!({ "recovered": true })))),
            )
            .build();

        let output = pipeline.execute(json!(null), CancellationToken::new()).await.unwrap();
        assert_eq!(output, json!({ "recovered": true }));
    }

    #[tokio::test]
    async fn unrecoverable_failure_returns_stage_failed() {
        let pipeline = PipelineBuilder::new("doomed")
            .add_stage(PipelineStage::new(
                "boom",
                Priority::Normal,
                stage_of(|_| Err(HelmError::Internal("boom".into()))),
            ))
            .build();

        let err = pipeline.execute(json!(null), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, HelmError::StageFailed { name, .. } if name == "boom"));
        assert_eq!(pipeline.metrics().failures, 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_before_running_further_stages() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = PipelineBuilder::new("cancelled")
            .add_stage(PipelineStage::new(
                "never-runs",
                Priority::Normal,
                stage_of(|v| Ok(v)),
            ))
            .build();

        let err = pipeline.execute(json!(null), cancel).await.unwrap_err();
        assert!(matches!(err, HelmError::Cancelled));
        assert_eq!(pipeline.metrics().aborts, 1);
    }

    #[tokio::test]
    async fn execute_stream_emits_completed_then_finished() {
        let pipeline = Arc::new(
            PipelineBuilder::new("streamed")
                .add_stage(PipelineStage::new(
                    "double",
                    Priority::Normal,
                    stage_of(|v| Ok(json!({ "value": v["value"].as_i64().unwrap_or(0) * 2 }))),
                ))
                .build(),
        );

        let mut rx = pipeline.clone().execute_stream(json!({ "value": 3 }), CancellationToken::new());
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, StageEvent::StageCompleted { ref stage, .. } if stage == "double"));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, StageEvent::Finished { output } if output == json!({ "value": 6 })));
        assert!(rx.recv().await.is_none());
    }
}
