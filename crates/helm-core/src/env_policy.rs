//! Environment variable allow-list for spawned child processes.
//!
//! Per spec.md §6.3 and §4.H's security invariant: the core never passes the
//! parent process's full environment to a spawned MCP server or external
//! command. Only variables the caller explicitly allow-lists (or that are
//! in the small startup allow-list) reach the child.

use std::collections::HashMap;

/// A small allow-list of environment variable names, read once at startup
/// and otherwise treated as an opaque, caller-supplied set. The core does
/// not hardcode which variables are in it beyond what tests exercise; the
/// concrete default list is a collaborator concern (spec.md §6.3).
#[derive(Debug, Clone, Default)]
pub struct EnvAllowList {
    names: Vec<String>,
}

impl EnvAllowList {
    /// Build an allow-list from an explicit set of variable names.
    #[must_use]
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// An empty allow-list: no parent environment variables pass through.
    #[must_use]
    pub fn none() -> Self {
        Self { names: Vec::new() }
    }

    /// Build the child environment: the caller-provided `explicit` map,
    /// overlaid with any allow-listed variables read from the current
    /// process environment that are not already present in `explicit`.
    ///
    /// This never inherits the parent's full environment — only the
    /// allow-listed names are considered (spec.md §4.H security invariant).
    #[must_use]
    pub fn build_child_env(&self, explicit: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env = explicit.clone();
        for name in &self.names {
            if env.contains_key(name) {
                continue;
            }
            if let Ok(value) = std::env::var(name) {
                env.insert(name.clone(), value);
            }
        }
        env
    }

    /// Whether `name` is in the allow-list.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_passes_only_explicit_vars() {
        let policy = EnvAllowList::none();
        let mut explicit = HashMap::new();
        explicit.insert("FOO".to_string(), "bar".to_string());

        let env = policy.build_child_env(&explicit);
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("FOO"), Some(&"bar".to_string()));
    }

    #[test]
    fn explicit_vars_take_precedence_over_allow_listed() {
        std::env::set_var("HELM_TEST_VAR_PRECEDENCE", "from_parent");
        let policy = EnvAllowList::new(["HELM_TEST_VAR_PRECEDENCE"]);
        let mut explicit = HashMap::new();
        explicit.insert("HELM_TEST_VAR_PRECEDENCE".to_string(), "from_caller".to_string());

        let env = policy.build_child_env(&explicit);
        assert_eq!(
            env.get("HELM_TEST_VAR_PRECEDENCE"),
            Some(&"from_caller".to_string())
        );
        std::env::remove_var("HELM_TEST_VAR_PRECEDENCE");
    }

    #[test]
    fn allows_reports_membership() {
        let policy = EnvAllowList::new(["PATH", "LANG"]);
        assert!(policy.allows("PATH"));
        assert!(!policy.allows("LD_PRELOAD"));
    }
}
