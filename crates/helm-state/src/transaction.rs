//! Transactional batching: accumulate ops, commit all-or-nothing.

use std::sync::Arc;

use helm_errors::HelmError;
use serde_json::Value;

use crate::entry::SetOptions;
use crate::store::StateStore;

enum Op {
    Set {
        key: String,
        value: Value,
        opts: SetOptions,
    },
    Delete {
        key: String,
    },
    SetIfVersion {
        key: String,
        value: Value,
        opts: SetOptions,
        expected: u64,
    },
}

/// Accumulates set/delete operations and commits them atomically: either
/// every operation applies and bumps its key's version, or none do
/// (spec.md §4.E).
pub struct Transaction {
    store: Arc<StateStore>,
    ops: Vec<Op>,
}

impl Transaction {
    pub(crate) fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    /// Queue a `set`.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: Value, opts: SetOptions) -> Self {
        self.ops.push(Op::Set {
            key: key.into(),
            value,
            opts,
        });
        self
    }

    /// Queue a `delete`.
    #[must_use]
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(Op::Delete { key: key.into() });
        self
    }

    /// Queue a compare-and-set: fails the whole transaction with
    /// [`HelmError::StateConflict`] if `key`'s current version does not
    /// equal `expected` at commit time.
    #[must_use]
    pub fn set_if_version(
        mut self,
        key: impl Into<String>,
        value: Value,
        opts: SetOptions,
        expected: u64,
    ) -> Self {
        self.ops.push(Op::SetIfVersion {
            key: key.into(),
            value,
            opts,
            expected,
        });
        self
    }

    /// Apply all queued operations atomically. On any `StateConflict`, the
    /// store is left completely unchanged and the conflicting error is
    /// returned. On success, returns the new version of each `set`-family
    /// op in order (deletes produce no version).
    pub fn commit(self) -> Result<Vec<Option<u64>>, HelmError> {
        let mut working = self.store.entries.read().clone();
        let mut versions = Vec::with_capacity(self.ops.len());

        for op in &self.ops {
            match op {
                Op::Set { key, value, opts } => {
                    let version = working.get(key).map_or(1, |e| e.version + 1);
                    apply_set(&mut working, key, value.clone(), opts.clone(), version);
                    versions.push(Some(version));
                }
                Op::Delete { key } => {
                    working.remove(key);
                    versions.push(None);
                }
                Op::SetIfVersion {
                    key,
                    value,
                    opts,
                    expected,
                } => {
                    let current = working.get(key).map_or(0, |e| e.version);
                    if current != *expected {
                        return Err(HelmError::StateConflict {
                            key: key.clone(),
                            expected: *expected,
                            found: current,
                        });
                    }
                    let version = current + 1;
                    apply_set(&mut working, key, value.clone(), opts.clone(), version);
                    versions.push(Some(version));
                }
            }
        }

        *self.store.entries.write() = working;
        Ok(versions)
    }
}

fn apply_set(
    working: &mut std::collections::HashMap<String, crate::entry::StateEntry>,
    key: &str,
    value: Value,
    opts: SetOptions,
    version: u64,
) {
    use chrono::Duration as ChronoDuration;
    use helm_core::Timestamp;

    let now = Timestamp::now();
    let created_at = working.get(key).map_or(now, |e| e.created_at);
    let ttl_expiry = opts
        .ttl
        .and_then(|ttl| ChronoDuration::from_std(ttl).ok())
        .map(|d| Timestamp::from_datetime(now.into_inner() + d));
    working.insert(
        key.to_string(),
        crate::entry::StateEntry {
            value,
            version,
            created_at,
            updated_at: now,
            ttl_expiry,
            tags: opts.tags,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::SetOptions;
    use serde_json::json;

    #[test]
    fn commit_applies_all_ops_atomically() {
        let store = Arc::new(StateStore::new());
        store.set("a", json!(1), SetOptions::none());

        let versions = store
            .transaction()
            .set("a", json!(2), SetOptions::none())
            .set("b", json!(3), SetOptions::none())
            .delete("a")
            .commit()
            .unwrap();

        assert_eq!(versions.len(), 3);
        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), Some(json!(3)));
    }

    #[test]
    fn conflicting_version_rolls_back_entire_transaction() {
        let store = Arc::new(StateStore::new());
        store.set("a", json!(1), SetOptions::none());

        let result = store
            .transaction()
            .set("untouched", json!("should not persist"), SetOptions::none())
            .set_if_version("a", json!(2), SetOptions::none(), 99)
            .commit();

        assert!(matches!(result, Err(HelmError::StateConflict { .. })));
        assert_eq!(store.get("untouched"), None);
        assert_eq!(store.get("a"), Some(json!(1)));
    }
}
