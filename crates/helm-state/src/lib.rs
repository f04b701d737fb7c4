//! helm-state — the versioned, snapshot-capable state store (spec.md §4.E).
//!
//! Readers see a consistent point-in-time view; writers are serialized
//! behind a single lock. TTL is enforced lazily on read and swept
//! periodically in the background by [`spawn_ttl_sweeper`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entry;
mod persistence;
mod snapshot;
mod store;
mod transaction;

pub use entry::{SetOptions, StateEntry};
pub use snapshot::{DiffResult, KeyDiff, Snapshot};
pub use store::{spawn_ttl_sweeper, StateStore};
pub use transaction::Transaction;
