//! helm-audit — the hash-chained, append-only audit log (spec.md §4.F).
//!
//! Every record's `this_hash` covers its own fields plus the previous
//! record's hash, so tampering with any record invalidates every hash from
//! that point forward. `verify()` walks the chain and reports the first
//! break; there is deliberately no `update`/`delete` API.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod log;
mod record;

pub use log::{AuditLog, ChainBreak, ExportFormat};
pub use record::{AuditOutcome, AuditRecord, ContentHash};
