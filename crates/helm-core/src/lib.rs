//! helm-core — shared foundation types for the helmsman DB shell runtime.
//!
//! Provides the id/timestamp newtypes, priority ranking, retry/backoff
//! policy, and environment allow-list used across every other `helm-*`
//! crate. Nothing here is async-runtime-specific beyond `tokio::time::sleep`
//! in the retry helper.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod env_policy;
pub mod ids;
pub mod priority;
pub mod retry;

pub use env_policy::EnvAllowList;
pub use ids::{
    AuditEntryId, CommandTicket, PipelineRunId, SessionId, SequenceCounter, Sequence,
    SnapshotId, Timestamp, WorkflowRunId,
};
pub use priority::Priority;
pub use retry::{retry_with_policy, RetryOutcome, RetryPolicy};
