//! Immutable snapshots and the diffs between them.

use std::collections::HashMap;

use helm_core::{SnapshotId, Timestamp};

use crate::entry::StateEntry;

/// An immutable copy of all live entries at the moment it was taken.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// This snapshot's id.
    pub id: SnapshotId,
    /// Monotonic sequence among snapshots taken by this store.
    pub seq: u64,
    /// Optional caller-provided description.
    pub description: Option<String>,
    /// When the snapshot was taken.
    pub created_at: Timestamp,
    /// The captured entries, keyed by their key.
    pub entries: HashMap<String, StateEntry>,
}

/// A single key whose version changed between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDiff {
    /// The key.
    pub key: String,
    /// Its version in the earlier snapshot.
    pub before_version: u64,
    /// Its version in the later snapshot.
    pub after_version: u64,
}

/// The result of comparing two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Keys present in the later snapshot but not the earlier one.
    pub added: Vec<String>,
    /// Keys present in the earlier snapshot but not the later one.
    pub removed: Vec<String>,
    /// Keys present in both with differing versions.
    pub modified: Vec<KeyDiff>,
}
