//! Server configuration: how to spawn an MCP server child process.

use std::collections::HashMap;
use std::time::Duration;

use helm_core::EnvAllowList;

use crate::codec::Framing;

/// Authorization applied during `initialize` (spec.md §9 open question:
/// "whether the MCP authorization handshake is required"). The core makes
/// the handshake extensible without assuming a scheme is in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthHandshake {
    /// A bearer token sent as a handshake parameter.
    Bearer(String),
}

/// Whether an in-flight `callTool` is allowed to complete against a catalog
/// that went stale mid-call (spec.md §9 open question on
/// `tools/list_changed` during an in-flight call).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleCatalogPolicy {
    /// Let the in-flight call complete against the catalog it started with.
    #[default]
    AllowInFlight,
    /// Re-validate that the tool is still present in the current catalog
    /// before returning a successful result.
    RevalidateBeforeComplete,
}

/// Everything needed to spawn and frame traffic with one MCP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The server's name, used for routing in the pool and in diagnostics.
    pub name: String,
    /// Executable path or name (resolved via `PATH` by the OS, never a
    /// shell).
    pub command: String,
    /// Argument vector, passed to the child directly — never
    /// shell-interpolated.
    pub args: Vec<String>,
    /// Explicit environment variables for the child.
    pub env: HashMap<String, String>,
    /// Allow-listed parent environment variables to also pass through.
    pub env_allow_list: EnvAllowList,
    /// Working directory for the child, if not the current process's.
    pub cwd: Option<std::path::PathBuf>,
    /// Wire framing to use with this server.
    pub framing: Framing,
    /// How long to wait for a graceful exit after `close()` before
    /// force-killing.
    pub shutdown_grace_period: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Whether to automatically reconnect on transport failure.
    pub auto_reconnect: bool,
    /// Retry policy governing reconnect backoff.
    pub retry_policy: helm_core::RetryPolicy,
    /// Authorization applied during the handshake, if any.
    pub auth: Option<AuthHandshake>,
    /// Policy for in-flight calls when the catalog goes stale mid-call.
    pub stale_catalog_policy: StaleCatalogPolicy,
}

impl ServerConfig {
    /// A minimal config with sane defaults for everything but `name` and
    /// `command`.
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            env_allow_list: EnvAllowList::none(),
            cwd: None,
            framing: Framing::NewlineDelimited,
            shutdown_grace_period: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            auto_reconnect: true,
            retry_policy: helm_core::RetryPolicy::default(),
            auth: None,
            stale_catalog_policy: StaleCatalogPolicy::default(),
        }
    }

    /// Builder-style argument setter.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style framing setter.
    #[must_use]
    pub const fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Builder-style authorization setter.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthHandshake) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Builder-style stale-catalog policy setter.
    #[must_use]
    pub const fn with_stale_catalog_policy(mut self, policy: StaleCatalogPolicy) -> Self {
        self.stale_catalog_policy = policy;
        self
    }
}
