//! The versioned key-value store itself (spec.md §4.E).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use helm_core::{SnapshotId, Timestamp};
use helm_errors::HelmError;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

use crate::entry::{SetOptions, StateEntry};
use crate::snapshot::{DiffResult, KeyDiff, Snapshot};
use crate::transaction::Transaction;

/// A versioned, snapshot-capable key-value store with TTL and optional
/// durable persistence (spec.md §4.E).
///
/// Readers observe a consistent point-in-time view and writers are
/// serialized: every operation takes the same `RwLock`, so writes never
/// interleave and reads never see a partially-applied write.
pub struct StateStore {
    pub(crate) entries: RwLock<HashMap<String, StateEntry>>,
    snapshots: RwLock<HashMap<SnapshotId, Snapshot>>,
    next_snapshot_seq: AtomicU64,
}

impl StateStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            next_snapshot_seq: AtomicU64::new(0),
        }
    }

    /// Set a key's value, bumping its version. Returns the new version.
    pub fn set(&self, key: impl Into<String>, value: Value, opts: SetOptions) -> u64 {
        let key = key.into();
        let now = Timestamp::now();
        let mut entries = self.entries.write();
        let version = entries.get(&key).map_or(1, |e| e.version + 1);
        let created_at = entries.get(&key).map_or(now, |e| e.created_at);
        let ttl_expiry = opts
            .ttl
            .and_then(|ttl| ChronoDuration::from_std(ttl).ok())
            .map(|d| Timestamp::from_datetime(now.into_inner() + d));
        entries.insert(
            key,
            StateEntry {
                value,
                version,
                created_at,
                updated_at: now,
                ttl_expiry,
                tags: opts.tags,
            },
        );
        version
    }

    /// Get a key's value. Returns `None` if absent or if its TTL has
    /// elapsed (lazy eviction removes the expired entry as a side effect).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_entry(key).map(|e| e.value)
    }

    /// Like [`StateStore::get`] but returns the whole entry.
    #[must_use]
    pub fn get_entry(&self, key: &str) -> Option<StateEntry> {
        let now = Timestamp::now();
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.is_expired_at(now)) {
            entries.remove(key);
            return None;
        }
        entries.get(key).cloned()
    }

    /// Whether a live (non-expired) entry exists for `key`.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.get_entry(key).is_some()
    }

    /// Delete a key. Returns true if it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// All live keys with the given prefix.
    #[must_use]
    pub fn keys_by_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Timestamp::now();
        self.entries
            .read()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// All live entries for which `predicate` returns true.
    #[must_use]
    pub fn query(
        &self,
        predicate: impl Fn(&str, &StateEntry) -> bool,
    ) -> Vec<(String, StateEntry)> {
        let now = Timestamp::now();
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| !e.is_expired_at(now))
            .filter(|(k, e)| predicate(k, e))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    /// Start a transaction builder that accumulates operations and commits
    /// them atomically.
    #[must_use]
    pub fn transaction(self: &Arc<Self>) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Remove all currently-expired entries. Called by the background
    /// sweeper; safe to call directly (e.g. from tests).
    pub fn sweep_expired(&self) -> usize {
        let now = Timestamp::now();
        let mut entries = self.entries.write();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        expired.len()
    }

    /// Take an immutable snapshot of all live entries.
    #[must_use]
    pub fn snapshot(&self, description: Option<String>) -> SnapshotId {
        let now = Timestamp::now();
        let entries = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| !e.is_expired_at(now))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        let id = SnapshotId::new();
        let seq = self.next_snapshot_seq.fetch_add(1, Ordering::SeqCst);
        self.snapshots.write().insert(
            id,
            Snapshot {
                id,
                seq,
                description,
                created_at: now,
                entries,
            },
        );
        id
    }

    /// Replace the store's live contents with a snapshot's, preserving
    /// versions.
    pub fn restore(&self, id: SnapshotId) -> Result<(), HelmError> {
        let snapshot = self
            .snapshots
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| HelmError::StateMiss(format!("snapshot {id}")))?;
        *self.entries.write() = snapshot.entries;
        Ok(())
    }

    /// Compare two snapshots by id.
    pub fn diff(&self, a: SnapshotId, b: SnapshotId) -> Result<DiffResult, HelmError> {
        let snapshots = self.snapshots.read();
        let snap_a = snapshots
            .get(&a)
            .ok_or_else(|| HelmError::StateMiss(format!("snapshot {a}")))?;
        let snap_b = snapshots
            .get(&b)
            .ok_or_else(|| HelmError::StateMiss(format!("snapshot {b}")))?;

        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut modified = Vec::new();

        for (key, entry_b) in &snap_b.entries {
            match snap_a.entries.get(key) {
                None => added.push(key.clone()),
                Some(entry_a) if entry_a.version != entry_b.version => modified.push(KeyDiff {
                    key: key.clone(),
                    before_version: entry_a.version,
                    after_version: entry_b.version,
                }),
                Some(_) => {}
            }
        }
        for key in snap_a.entries.keys() {
            if !snap_b.entries.contains_key(key) {
                removed.push(key.clone());
            }
        }

        Ok(DiffResult {
            added,
            removed,
            modified,
        })
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the background TTL sweeper. Lazy eviction on read is mandatory and
/// handles correctness on its own; this task only bounds how long a dead
/// entry can linger unread.
pub fn spawn_ttl_sweeper(store: Arc<StateStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let swept = store.sweep_expired();
            if swept > 0 {
                warn!(count = swept, "ttl sweeper evicted expired entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_round_trip() {
        let store = StateStore::new();
        store.set("a", json!(1), SetOptions::none());
        assert_eq!(store.get("a"), Some(json!(1)));
    }

    #[test]
    fn version_increments_on_every_set() {
        let store = StateStore::new();
        assert_eq!(store.set("a", json!(1), SetOptions::none()), 1);
        assert_eq!(store.set("a", json!(2), SetOptions::none()), 2);
    }

    #[test]
    fn expired_entry_reads_as_absent() {
        let store = StateStore::new();
        store.set(
            "a",
            json!(1),
            SetOptions::none().with_ttl(Duration::from_millis(1)),
        );
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.get("a"), None);
        assert!(!store.has("a"));
    }

    #[test]
    fn s3_snapshot_and_restore() {
        let store = StateStore::new();
        store.set("a", json!(1), SetOptions::none());
        store.set("b", json!(2), SetOptions::none());
        let id = store.snapshot(Some("x".into()));
        let a_version_at_snapshot = store.get_entry("a").unwrap().version;

        store.set("a", json!(99), SetOptions::none());
        store.delete("b");
        store.restore(id).unwrap();

        assert_eq!(store.get("a"), Some(json!(1)));
        assert_eq!(store.get("b"), Some(json!(2)));
        assert_eq!(store.get_entry("a").unwrap().version, a_version_at_snapshot);
    }

    #[test]
    fn keys_by_prefix_excludes_expired() {
        let store = StateStore::new();
        store.set("user:1", json!("a"), SetOptions::none());
        store.set("user:2", json!("b"), SetOptions::none());
        store.set("other", json!("c"), SetOptions::none());
        let mut keys = store.keys_by_prefix("user:");
        keys.sort();
        assert_eq!(keys, vec!["user:1", "user:2"]);
    }

    #[test]
    fn diff_reports_added_removed_modified() {
        let store = StateStore::new();
        store.set("a", json!(1), SetOptions::none());
        store.set("b", json!(1), SetOptions::none());
        let before = store.snapshot(None);

        store.set("a", json!(2), SetOptions::none());
        store.delete("b");
        store.set("c", json!(1), SetOptions::none());
        let after = store.snapshot(None);

        let diff = store.diff(before, after).unwrap();
        assert_eq!(diff.added, vec!["c".to_string()]);
        assert_eq!(diff.removed, vec!["b".to_string()]);
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].key, "a");
    }
}
