//! DAG workflow orchestrator: dependency resolution, template-bound
//! parameter binding, retry/`continue_on_error`, abort propagation, and
//! checkpointing (spec.md §4.K).

mod graph;
mod step;
mod template;
mod workflow;

pub use graph::topological_groups;
pub use step::{CustomStepFn, StepKind, StepOutput, WorkflowStep};
pub use template::{resolve_template, TemplateContext};
pub use workflow::{Checkpoint, CheckpointSink, LlmClient, Workflow, WorkflowBuilder, WorkflowEvent};

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use helm_core::RetryPolicy;
    use helm_errors::HelmError;
    use helm_mcp::ClientPool;
    use helm_state::StateStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn custom(f: impl Fn(serde_json::Value) -> Result<serde_json::Value, HelmError> + Send + Sync + 'static) -> CustomStepFn {
        Arc::new(move |input| -> BoxFuture<'static, Result<serde_json::Value, HelmError>> {
            let result = f(input);
            Box::pin(async move { result })
        })
    }

    #[tokio::test]
    async fn runs_independent_steps_then_their_dependent() {
        let workflow = WorkflowBuilder::new("demo", ClientPool::new(), Arc::new(StateStore::new()))
            .add_step(WorkflowStep::new(
                "a",
                StepKind::Custom(custom(|_| Ok(json!({ "value": 1 })))),
            ))
            .add_step(WorkflowStep::new(
                "b",
                StepKind::Custom(custom(|_| Ok(json!({ "value": 2 })))),
            ))
            .add_step(
                WorkflowStep::new(
                    "c",
                    StepKind::Custom(custom(|input| {
                        let a = input["a"]["value"].as_i64().unwrap_or(0);
                        let b = input["b"]["value"].as_i64().unwrap_or(0);
                        Ok(json!({ "sum": a + b }))
                    })),
                )
                .depends_on(["a", "b"]),
            )
            .build()
            .unwrap();

        let results = workflow.execute(json!(null), CancellationToken::new()).await.unwrap();
        assert_eq!(results["c"].as_value(), json!({ "sum": 3 }));
    }

    #[tokio::test]
    async fn template_reference_resolves_prior_step_output() {
        let workflow = WorkflowBuilder::new("demo", ClientPool::new(), Arc::new(StateStore::new()))
            .add_step(WorkflowStep::new(
                "fetch",
                StepKind::Custom(custom(|_| Ok(json!({ "name": "astrid" })))),
            ))
            .add_step(
                WorkflowStep::new(
                    "greet",
                    StepKind::Custom(custom(|input| Ok(json!({ "message": input })))),
                )
                .depends_on(["fetch"]),
            )
            .build()
            .unwrap();

        let results = workflow.execute(json!(null), CancellationToken::new()).await.unwrap();
        assert!(results.contains_key("greet"));
    }

    #[tokio::test]
    async fn failed_step_without_continue_on_error_fails_the_run() {
        let workflow = WorkflowBuilder::new("demo", ClientPool::new(), Arc::new(StateStore::new()))
            .add_step(WorkflowStep::new(
                "boom",
                StepKind::Custom(custom(|_| Err(HelmError::Internal("boom".into())))),
            ))
            .build()
            .unwrap();

        let err = workflow.execute(json!(null), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, HelmError::Internal(_)));
    }

    #[tokio::test]
    async fn continue_on_error_records_an_error_envelope_and_keeps_going() {
        let ran_dependent = Arc::new(AtomicU32::new(0));
        let ran_dependent_clone = ran_dependent.clone();
        let workflow = WorkflowBuilder::new("demo", ClientPool::new(), Arc::new(StateStore::new()))
            .add_step(
                WorkflowStep::new(
                    "boom",
                    StepKind::Custom(custom(|_| Err(HelmError::Internal("boom".into())))),
                )
                .continue_on_error(true)
                .with_retry_policy(RetryPolicy::no_retry()),
            )
            .add_step(
                WorkflowStep::new(
                    "after",
                    StepKind::Custom(custom(move |_| {
                        ran_dependent_clone.fetch_add(1, Ordering::SeqCst);
                        Ok(json!("ok"))
                    })),
                )
                .depends_on(["boom"]),
            )
            .build()
            .unwrap();

        let results = workflow.execute(json!(null), CancellationToken::new()).await.unwrap();
        assert!(matches!(results["boom"], StepOutput::Error { .. }));
        assert_eq!(ran_dependent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn conditional_step_selects_the_true_branch() {
        let yes_runs = Arc::new(AtomicU32::new(0));
        let yes_runs_clone = yes_runs.clone();
        let no_runs = Arc::new(AtomicU32::new(0));
        let no_runs_clone = no_runs.clone();
        let workflow = WorkflowBuilder::new("demo", ClientPool::new(), Arc::new(StateStore::new()))
            .add_step(WorkflowStep::new(
                "maybe",
                StepKind::Conditional {
                    predicate: json!(true),
                    when_true: "yes".to_string(),
                    when_false: Some("no".to_string()),
                },
            ))
            .add_step(WorkflowStep::new(
                "yes",
                StepKind::Custom(custom(move |_| {
                    yes_runs_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("took the true branch"))
                })),
            ))
            .add_step(WorkflowStep::new(
                "no",
                StepKind::Custom(custom(move |_| {
                    no_runs_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("took the false branch"))
                })),
            ))
            .build()
            .unwrap();

        let results = workflow.execute(json!(null), CancellationToken::new()).await.unwrap();
        assert_eq!(results["maybe"].as_value(), json!("took the true branch"));
        assert!(!results.contains_key("no"), "false branch must not run when the predicate is true");
        assert_eq!(yes_runs.load(Ordering::SeqCst), 1, "true branch must run exactly once");
        assert_eq!(no_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn parallel_step_gathers_child_outputs_in_order() {
        let workflow = WorkflowBuilder::new("demo", ClientPool::new(), Arc::new(StateStore::new()))
            .add_step(WorkflowStep::new(
                "fan_out",
                StepKind::Parallel {
                    children: vec!["x".to_string(), "y".to_string()],
                },
            ))
            .add_step(WorkflowStep::new("x", StepKind::Custom(custom(|_| Ok(json!(1))))))
            .add_step(WorkflowStep::new("y", StepKind::Custom(custom(|_| Ok(json!(2))))))
            .build()
            .unwrap();

        let results = workflow.execute(json!(null), CancellationToken::new()).await.unwrap();
        assert_eq!(results["fan_out"].as_value(), json!([1, 2]));
    }

    #[tokio::test]
    async fn already_cancelled_token_aborts_before_any_step() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let workflow = WorkflowBuilder::new("demo", ClientPool::new(), Arc::new(StateStore::new()))
            .add_step(WorkflowStep::new("never", StepKind::Custom(custom(|v| Ok(v)))))
            .build()
            .unwrap();

        let err = workflow.execute(json!(null), cancel).await.unwrap_err();
        assert!(matches!(err, HelmError::Cancelled));
    }

    #[test]
    fn builder_rejects_cyclic_dependencies() {
        let err = WorkflowBuilder::new("demo", ClientPool::new(), Arc::new(StateStore::new()))
            .add_step(WorkflowStep::new("a", StepKind::Custom(custom(|v| Ok(v)))).depends_on(["b"]))
            .add_step(WorkflowStep::new("b", StepKind::Custom(custom(|v| Ok(v)))).depends_on(["a"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, HelmError::CircularDependency));
    }
}
