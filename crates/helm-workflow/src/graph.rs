//! Dependency graph: cycle detection and topological grouping of
//! independent steps (spec.md §4.K).

use std::collections::{HashMap, HashSet};

use helm_errors::HelmError;

use crate::step::WorkflowStep;

/// Compute the execution order of `steps` as a sequence of groups:
/// every step in a group has all its dependencies satisfied by steps in
/// earlier groups, and steps within a group may run concurrently.
///
/// Returns `CircularDependency` if the dependency graph contains a cycle,
/// and `DependencyFailed` if a step depends on an id that doesn't exist.
pub fn topological_groups(steps: &[WorkflowStep]) -> Result<Vec<Vec<String>>, HelmError> {
    let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    for step in steps {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(HelmError::DependencyFailed(format!(
                    "step {} depends on unknown step {dep}",
                    step.id
                )));
            }
        }
    }

    let mut remaining: HashMap<&str, &WorkflowStep> = steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut satisfied: HashSet<&str> = HashSet::new();
    let mut groups = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .values()
            .filter(|step| step.depends_on.iter().all(|dep| satisfied.contains(dep.as_str())))
            .map(|step| step.id.as_str())
            .collect();

        if ready.is_empty() {
            return Err(HelmError::CircularDependency);
        }

        for id in &ready {
            remaining.remove(id);
            satisfied.insert(id);
        }
        let mut group: Vec<String> = ready.into_iter().map(String::from).collect();
        group.sort();
        groups.push(group);
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepKind;
    use helm_core::RetryPolicy;
    use serde_json::json;

    fn step(id: &str, depends_on: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            kind: StepKind::Tool {
                tool: "noop".to_string(),
                params: json!({}),
            },
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            retry_policy: RetryPolicy::no_retry(),
            continue_on_error: false,
        }
    }

    #[test]
    fn groups_independent_steps_together() {
        let steps = vec![step("a", &[]), step("b", &[]), step("c", &["a", "b"])];
        let groups = topological_groups(&steps).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec!["a".to_string(), "b".to_string()]);
        assert_eq!(groups[1], vec!["c".to_string()]);
    }

    #[test]
    fn detects_a_cycle() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        let err = topological_groups(&steps).unwrap_err();
        assert!(matches!(err, HelmError::CircularDependency));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let steps = vec![step("a", &["ghost"])];
        let err = topological_groups(&steps).unwrap_err();
        assert!(matches!(err, HelmError::DependencyFailed(_)));
    }

    #[test]
    fn linear_chain_is_fully_ordered() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])];
        let groups = topological_groups(&steps).unwrap();
        assert_eq!(groups, vec![vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]);
    }
}
