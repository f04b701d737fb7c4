//! The error taxonomy shared by every `helm-*` crate (spec.md §7).

use std::time::Duration;
use thiserror::Error;

/// All error kinds the core can produce, per spec.md §7's taxonomy table.
#[derive(Debug, Error, Clone)]
pub enum HelmError {
    /// Configuration was invalid or incomplete.
    #[error("configuration error: {0}")]
    Config(String),

    /// The MCP transport failed to spawn the child process.
    #[error("failed to spawn MCP server {server}: {reason}")]
    SpawnFailed {
        /// Server name.
        server: String,
        /// Underlying OS error text.
        reason: String,
    },

    /// The transport's pipe to the child broke.
    #[error("broken pipe to MCP server {server}")]
    BrokenPipe {
        /// Server name.
        server: String,
    },

    /// The child process exited.
    #[error("MCP server {server} exited (code={code:?}, signal={signal:?})")]
    Exited {
        /// Server name.
        server: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Signal that terminated the process, if any.
        signal: Option<i32>,
    },

    /// A frame could not be parsed as valid framing (newline or Content-Length).
    #[error("framing error: {0}")]
    FramingError(String),

    /// A decoded JSON-RPC message did not match the expected schema.
    #[error("schema error: {0}")]
    SchemaError(String),

    /// Two in-flight requests or a response collided on the same id.
    #[error("duplicate request id: {0}")]
    DuplicateId(String),

    /// An operation exceeded its configured timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// An operation was explicitly cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The MCP connection was lost while a request was outstanding.
    #[error("connection lost to server {server}")]
    ConnectionLost {
        /// Server name.
        server: String,
    },

    /// The `initialize` handshake failed.
    #[error("handshake failed with server {server}: {reason}")]
    HandshakeFailed {
        /// Server name.
        server: String,
        /// Failure reason.
        reason: String,
    },

    /// No server advertises the requested tool.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// More than one server advertises the requested tool name.
    #[error("ambiguous tool {tool}: advertised by {servers:?}")]
    AmbiguousTool {
        /// Requested tool name.
        tool: String,
        /// Servers that advertise it.
        servers: Vec<String>,
    },

    /// No server advertises the requested resource.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The command queue is at capacity and the command was not critical.
    #[error("queue is full (max {max_size})")]
    QueueFull {
        /// Configured maximum queue size.
        max_size: usize,
    },

    /// A lower-priority waiter was evicted to make room for a CRITICAL command.
    #[error("preempted by a higher-priority command")]
    Preempted,

    /// The operation was rejected by a rate limiter.
    #[error("rate limited{}", retry_after.map(|d| format!(", retry after {d:?}")).unwrap_or_default())]
    RateLimited {
        /// Server-provided retry hint, if any.
        retry_after: Option<Duration>,
    },

    /// A pipeline stage failed after exhausting its retry policy.
    #[error("stage {name} failed: {reason}")]
    StageFailed {
        /// Stage name.
        name: String,
        /// Underlying failure reason.
        reason: String,
    },

    /// A workflow graph contained a cycle.
    #[error("circular dependency detected in workflow")]
    CircularDependency,

    /// A workflow step depended on a step that failed.
    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    /// A requested state key was not present.
    #[error("state key not found: {0}")]
    StateMiss(String),

    /// An optimistic version check failed during a transaction commit.
    #[error("state conflict on key {key}: expected version {expected}, found {found}")]
    StateConflict {
        /// Key in conflict.
        key: String,
        /// Version the writer expected.
        expected: u64,
        /// Version actually present.
        found: u64,
    },

    /// The audit hash chain was broken at the given sequence number.
    #[error("audit chain broken at sequence {0}")]
    AuditChainBroken(u64),

    /// A critical event could not be delivered within its backpressure deadline.
    #[error("backpressure: event delivery deadline exceeded")]
    Backpressure,

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Lightweight classification of an error, without its payload — what
/// `ErrorRouter::classify` and recovery strategies match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`HelmError::Config`].
    Config,
    /// See [`HelmError::SpawnFailed`].
    SpawnFailed,
    /// See [`HelmError::BrokenPipe`].
    BrokenPipe,
    /// See [`HelmError::Exited`].
    Exited,
    /// See [`HelmError::FramingError`].
    FramingError,
    /// See [`HelmError::SchemaError`].
    SchemaError,
    /// See [`HelmError::DuplicateId`].
    DuplicateId,
    /// See [`HelmError::Timeout`].
    Timeout,
    /// See [`HelmError::Cancelled`].
    Cancelled,
    /// See [`HelmError::ConnectionLost`].
    ConnectionLost,
    /// See [`HelmError::HandshakeFailed`].
    HandshakeFailed,
    /// See [`HelmError::ToolNotFound`].
    ToolNotFound,
    /// See [`HelmError::AmbiguousTool`].
    AmbiguousTool,
    /// See [`HelmError::ResourceNotFound`].
    ResourceNotFound,
    /// See [`HelmError::QueueFull`].
    QueueFull,
    /// See [`HelmError::Preempted`].
    Preempted,
    /// See [`HelmError::RateLimited`].
    RateLimited,
    /// See [`HelmError::StageFailed`].
    StageFailed,
    /// See [`HelmError::CircularDependency`].
    CircularDependency,
    /// See [`HelmError::DependencyFailed`].
    DependencyFailed,
    /// See [`HelmError::StateMiss`].
    StateMiss,
    /// See [`HelmError::StateConflict`].
    StateConflict,
    /// See [`HelmError::AuditChainBroken`].
    AuditChainBroken,
    /// See [`HelmError::Backpressure`].
    Backpressure,
    /// See [`HelmError::Internal`].
    Internal,
}

impl HelmError {
    /// Classify this error into its [`ErrorKind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::SpawnFailed { .. } => ErrorKind::SpawnFailed,
            Self::BrokenPipe { .. } => ErrorKind::BrokenPipe,
            Self::Exited { .. } => ErrorKind::Exited,
            Self::FramingError(_) => ErrorKind::FramingError,
            Self::SchemaError(_) => ErrorKind::SchemaError,
            Self::DuplicateId(_) => ErrorKind::DuplicateId,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            Self::HandshakeFailed { .. } => ErrorKind::HandshakeFailed,
            Self::ToolNotFound(_) => ErrorKind::ToolNotFound,
            Self::AmbiguousTool { .. } => ErrorKind::AmbiguousTool,
            Self::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            Self::QueueFull { .. } => ErrorKind::QueueFull,
            Self::Preempted => ErrorKind::Preempted,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::StageFailed { .. } => ErrorKind::StageFailed,
            Self::CircularDependency => ErrorKind::CircularDependency,
            Self::DependencyFailed(_) => ErrorKind::DependencyFailed,
            Self::StateMiss(_) => ErrorKind::StateMiss,
            Self::StateConflict { .. } => ErrorKind::StateConflict,
            Self::AuditChainBroken(_) => ErrorKind::AuditChainBroken,
            Self::Backpressure => ErrorKind::Backpressure,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error is, in principle, transient and worth retrying
    /// (used as the default `should_retry` predicate by callers that don't
    /// have a more specific policy).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::BrokenPipe
                | ErrorKind::ConnectionLost
                | ErrorKind::Timeout
                | ErrorKind::RateLimited
        )
    }
}

/// Result type alias used throughout the core crates.
pub type HelmResult<T> = Result<T, HelmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = HelmError::Timeout(Duration::from_secs(1));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_transient());
    }

    #[test]
    fn non_transient_errors_are_flagged() {
        let err = HelmError::CircularDependency;
        assert!(!err.is_transient());
    }
}
