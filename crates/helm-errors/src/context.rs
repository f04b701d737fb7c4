//! Context carried alongside an error into the router.

use std::time::Duration;

/// Where the error originated, so strategies can be scoped (e.g. "only
/// retry network errors from the MCP client", not from the audit log).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The MCP transport or client.
    Mcp,
    /// The command queue / processor.
    Queue,
    /// The pipeline engine.
    Pipeline,
    /// The workflow orchestrator.
    Workflow,
    /// The state store.
    State,
    /// The audit log.
    Audit,
    /// The event bus.
    Events,
    /// Anywhere else.
    Other,
}

/// Extra information a recovery strategy may need beyond the error itself.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Where the error came from.
    pub origin: Option<Origin>,
    /// Number of attempts already made for this operation (0 on the first
    /// failure).
    pub attempts_made: u32,
    /// Server- or service-provided hint for how long to wait before
    /// retrying (e.g. an HTTP `Retry-After` equivalent).
    pub retry_after_hint: Option<Duration>,
}

impl ErrorContext {
    /// A context with no prior attempts and no hints.
    #[must_use]
    pub fn new(origin: Origin) -> Self {
        Self {
            origin: Some(origin),
            attempts_made: 0,
            retry_after_hint: None,
        }
    }

    /// Builder-style setter for `attempts_made`.
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts_made = attempts;
        self
    }

    /// Builder-style setter for `retry_after_hint`.
    #[must_use]
    pub const fn with_retry_after(mut self, hint: Duration) -> Self {
        self.retry_after_hint = Some(hint);
        self
    }
}
