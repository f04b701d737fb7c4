//! Wires every `helm-*` crate together into one running instance: the MCP
//! client pool, state store, audit log, error router, and command queue.

use std::sync::Arc;
use std::time::Duration;

use helm_audit::AuditLog;
use helm_errors::{default_router, ErrorRouter, HelmError};
use helm_mcp::ClientPool;
use helm_queue::{CommandProcessor, CommandQueue, QueueConfig};
use helm_state::StateStore;
use tracing::warn;

use crate::config::Config;

/// Everything a running `helmctl` session needs, built once at startup.
pub struct App {
    /// Loaded configuration.
    pub config: Config,
    /// Connected (or connecting) MCP servers.
    pub pool: ClientPool,
    /// The process-lifetime state store.
    pub state: Arc<StateStore>,
    /// The append-only audit log.
    pub audit: Arc<AuditLog>,
    /// Classifies and routes errors to recovery strategies.
    pub router: Arc<ErrorRouter>,
    /// Dispatches parsed commands, built-in or spawned.
    pub processor: Arc<CommandProcessor>,
    /// The priority async command queue.
    pub queue: CommandQueue,
}

impl App {
    /// Build an `App` from a loaded config: connect every declared MCP
    /// server, load persisted state/audit data if configured, and start the
    /// command queue's dispatcher.
    pub async fn bootstrap(config: Config) -> Result<Self, HelmError> {
        let router = Arc::new(default_router(helm_core::RetryPolicy::default()));

        let pool = ClientPool::new();
        pool.attach_error_router(router.clone());
        for server in config.server_configs() {
            let name = server.name.clone();
            if let Err(error) = pool.add(server).await {
                warn!(server = %name, %error, "failed to connect MCP server at startup");
            }
        }

        let state = Arc::new(StateStore::new());
        if let Some(path) = &config.state_path {
            if path.exists() {
                state.load(path)?;
            }
        }

        let audit = Arc::new(match &config.audit_path {
            Some(path) => AuditLog::open(path)?,
            None => AuditLog::in_memory(),
        });

        let processor = Arc::new(CommandProcessor::new());
        let queue_config = QueueConfig {
            concurrency: config.queue_concurrency,
            ..QueueConfig::default()
        };
        let queue = CommandQueue::new(processor.clone(), queue_config);

        Ok(Self {
            config,
            pool,
            state,
            audit,
            router,
            processor,
            queue,
        })
    }

    /// Per-command execution context derived from config defaults.
    #[must_use]
    pub fn execution_context(&self) -> helm_queue::ExecutionContext {
        helm_queue::ExecutionContext {
            cwd: None,
            env: std::collections::HashMap::new(),
            env_allow_list: self.config.env_allow_list(),
            timeout: Duration::from_secs(self.config.command_timeout_secs),
        }
    }

    /// Persist state (if configured) and shut down every connected MCP
    /// client. Safe to call once during graceful shutdown.
    pub async fn shutdown(&self) {
        if let Some(path) = &self.config.state_path {
            if let Err(error) = self.state.save(path) {
                warn!(%error, "failed to persist state on shutdown");
            }
        }
        self.pool.shutdown_all().await;
        self.queue.drain().await;
    }
}
