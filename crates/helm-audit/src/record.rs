//! The `AuditRecord` type and its hash-chain fields (spec.md §4.F, §6.4).

use helm_core::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A SHA-256 digest, rendered as lowercase hex in `Display`/`Debug`.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// The chain's genesis value: 32 zero bytes, used as the first
    /// record's `prev_hash` (spec.md §6.4).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Parse from a hex string.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Render as lowercase hex.
    #[must_use]
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Whether the audited action succeeded or failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The action completed successfully.
    Success {
        /// Optional free-form details.
        details: Option<String>,
    },
    /// The action failed.
    Failure {
        /// The failure reason.
        error: String,
    },
}

impl AuditOutcome {
    /// A bare success outcome.
    #[must_use]
    pub fn success() -> Self {
        Self::Success { details: None }
    }

    /// A success outcome with details.
    #[must_use]
    pub fn success_with(details: impl Into<String>) -> Self {
        Self::Success {
            details: Some(details.into()),
        }
    }

    /// A failure outcome.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    /// Whether this outcome represents success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One append-only audit record. `this_hash` is computed over every other
/// field, so the struct is constructed via [`AuditRecord::new`] rather than
/// assembled field-by-field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the chain, starting at 0.
    pub seq: u64,
    /// When the action occurred.
    pub ts: Timestamp,
    /// Who (or what) performed the action.
    pub actor: String,
    /// What action was performed.
    pub action: String,
    /// What the action targeted.
    pub resource: String,
    /// The result.
    pub outcome: AuditOutcome,
    /// The previous record's `this_hash` (or [`ContentHash::ZERO`] for the
    /// first record).
    pub prev_hash: ContentHash,
    /// `SHA-256(prev_hash || canonical_serialization(record_without_this_hash))`.
    pub this_hash: ContentHash,
}

/// Fields needed to compute a new record, before its hash exists.
#[derive(Serialize)]
struct UnhashedRecord<'a> {
    seq: u64,
    ts: Timestamp,
    actor: &'a str,
    action: &'a str,
    resource: &'a str,
    outcome: &'a AuditOutcome,
    prev_hash: ContentHash,
}

impl AuditRecord {
    /// Build and hash a new record that follows `prev_hash` in the chain.
    #[must_use]
    pub fn new(
        seq: u64,
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        outcome: AuditOutcome,
        prev_hash: ContentHash,
    ) -> Self {
        let ts = Timestamp::now();
        let actor = actor.into();
        let action = action.into();
        let resource = resource.into();

        let this_hash = compute_hash(&UnhashedRecord {
            seq,
            ts,
            actor: &actor,
            action: &action,
            resource: &resource,
            outcome: &outcome,
            prev_hash,
        });

        Self {
            seq,
            ts,
            actor,
            action,
            resource,
            outcome,
            prev_hash,
            this_hash,
        }
    }

    /// Recompute this record's hash from its fields, to check for tampering.
    #[must_use]
    pub fn recompute_hash(&self) -> ContentHash {
        compute_hash(&UnhashedRecord {
            seq: self.seq,
            ts: self.ts,
            actor: &self.actor,
            action: &self.action,
            resource: &self.resource,
            outcome: &self.outcome,
            prev_hash: self.prev_hash,
        })
    }
}

fn compute_hash(record: &UnhashedRecord<'_>) -> ContentHash {
    let canonical =
        serde_json::to_vec(record).expect("UnhashedRecord serialization cannot fail");
    let mut hasher = Sha256::new();
    hasher.update(record.prev_hash.0);
    hasher.update(&canonical);
    ContentHash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_record_chains_from_zero() {
        let record = AuditRecord::new(0, "user", "login", "session", AuditOutcome::success(), ContentHash::ZERO);
        assert_eq!(record.prev_hash, ContentHash::ZERO);
        assert_eq!(record.this_hash, record.recompute_hash());
    }

    #[test]
    fn tampering_changes_recomputed_hash() {
        let mut record =
            AuditRecord::new(0, "user", "login", "session", AuditOutcome::success(), ContentHash::ZERO);
        let original_hash = record.this_hash;
        record.action = "tampered".to_string();
        assert_ne!(record.recompute_hash(), original_hash);
    }
}
