//! The `StateEntry` type stored per key.

use helm_core::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single versioned value in the state store, plus its bookkeeping
/// metadata (spec.md §4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    /// The stored value.
    pub value: Value,
    /// Monotonically increasing version; bumped on every `set`.
    pub version: u64,
    /// When this key was first set.
    pub created_at: Timestamp,
    /// When this key was last set.
    pub updated_at: Timestamp,
    /// Absolute expiry time, if a TTL was given.
    pub ttl_expiry: Option<Timestamp>,
    /// Free-form tags attached at set time.
    pub tags: Vec<String>,
}

impl StateEntry {
    /// Whether this entry has expired as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.ttl_expiry.is_some_and(|expiry| now >= expiry)
    }
}

/// Options accepted by `StateStore::set`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time-to-live from the moment of the call.
    pub ttl: Option<std::time::Duration>,
    /// Tags to attach to the entry.
    pub tags: Vec<String>,
}

impl SetOptions {
    /// No TTL, no tags.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Builder-style TTL setter.
    #[must_use]
    pub fn with_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Builder-style tag setter.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}
