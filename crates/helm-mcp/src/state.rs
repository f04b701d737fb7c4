//! The MCP client's connection state machine (spec.md §4.C).

/// Connection lifecycle state. Initial state is `Disconnected`; `Error`
/// (reconnect disabled or exhausted) and `Disconnected` after an explicit
/// `shutdown()` are the only terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No transport; idle.
    Disconnected,
    /// Transport spawned, handshake in flight.
    Connecting,
    /// Handshake succeeded; tools/resources discovered.
    Connected,
    /// Transport lost; waiting on backoff before the next connect attempt.
    Reconnecting,
    /// `shutdown()` was called or is in progress.
    ShuttingDown,
    /// Handshake failed and auto-reconnect is disabled, or the retry
    /// budget was exhausted.
    Error,
}

impl ClientState {
    /// Whether requests can be sent in this state.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether this is one of the two terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Disconnected)
    }
}

/// Events the client emits as it connects, discovers, and receives
/// out-of-band notifications (spec.md §4.C).
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Entered `Connected`.
    Connected,
    /// Left `Connected` unexpectedly (not via `shutdown()`).
    Disconnected,
    /// A recoverable error worth surfacing to observers.
    Error(String),
    /// The tools catalog changed (initial discovery or
    /// `tools/list_changed`).
    ToolsChanged,
    /// The resources catalog changed.
    ResourcesChanged,
    /// A server-sent notification that isn't one this client handles
    /// internally.
    Notification {
        /// The notification's method name.
        method: String,
        /// Its parameters, if any.
        params: Option<serde_json::Value>,
    },
    /// A frame failed to parse; the transport has already resynchronized.
    ProtocolAnomaly(String),
}
