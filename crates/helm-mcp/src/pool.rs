//! Routes tool calls across every connected server, disambiguating by
//! `"server:tool"` when more than one server advertises the same name
//! (spec.md §4.D).

use std::sync::Arc;

use dashmap::DashMap;
use helm_errors::{ErrorRouter, HelmError};
use parking_lot::RwLock;
use serde_json::Value;

use crate::catalog::ToolDefinition;
use crate::client::McpClient;
use crate::config::ServerConfig;

/// A tool definition annotated with the server that advertises it.
#[derive(Debug, Clone)]
pub struct PooledToolDefinition {
    /// The owning server's name.
    pub server: String,
    /// The underlying tool definition.
    pub tool: ToolDefinition,
}

/// A set of MCP clients managed together. Tool calls are routed by name;
/// when two or more servers advertise the same tool name, the caller must
/// disambiguate with `"server:tool"`.
#[derive(Default)]
pub struct ClientPool {
    clients: DashMap<String, McpClient>,
    error_router: RwLock<Option<Arc<ErrorRouter>>>,
}

impl ClientPool {
    /// An empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an error router that every current and future client's stderr
    /// output is routed through.
    pub fn attach_error_router(&self, router: Arc<ErrorRouter>) {
        for entry in self.clients.iter() {
            entry.value().attach_error_router(router.clone());
        }
        *self.error_router.write() = Some(router);
    }

    /// Build a client from `config`, add it to the pool under its name, and
    /// connect it. Replaces any existing client with the same name (the old
    /// one is not explicitly shut down by this call — callers that care
    /// should `remove` and `shutdown` it first).
    pub async fn add(&self, config: ServerConfig) -> Result<(), HelmError> {
        let client = McpClient::new(config);
        if let Some(router) = self.error_router.read().clone() {
            client.attach_error_router(router);
        }
        client.connect().await?;
        self.clients.insert(client.name().to_string(), client);
        Ok(())
    }

    /// Shut down and remove a client from the pool.
    pub async fn remove(&self, name: &str) {
        if let Some((_, client)) = self.clients.remove(name) {
            client.shutdown().await;
        }
    }

    /// Look up a client by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<McpClient> {
        self.clients.get(name).map(|entry| entry.value().clone())
    }

    /// Names of every client currently in the pool.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// The union of every connected client's tool catalog, each entry
    /// annotated with its owning server.
    #[must_use]
    pub fn list_tools(&self) -> Vec<PooledToolDefinition> {
        self.clients
            .iter()
            .flat_map(|entry| {
                let server = entry.key().clone();
                entry
                    .value()
                    .list_tools()
                    .into_iter()
                    .map(move |tool| PooledToolDefinition {
                        server: server.clone(),
                        tool,
                    })
            })
            .collect()
    }

    /// Resolve a tool reference to the single client that should handle it.
    ///
    /// `reference` may be a bare tool name (resolved only if exactly one
    /// server advertises it) or `"server:tool"` to pick a server explicitly.
    fn resolve(&self, reference: &str) -> Result<(McpClient, String), HelmError> {
        if let Some((server, tool)) = reference.split_once(':') {
            let client = self
                .get(server)
                .ok_or_else(|| HelmError::ToolNotFound(reference.to_string()))?;
            return Ok((client, tool.to_string()));
        }

        let owners: Vec<String> = self
            .clients
            .iter()
            .filter(|entry| entry.value().get_tool(reference).is_some())
            .map(|entry| entry.key().clone())
            .collect();

        match owners.len() {
            0 => Err(HelmError::ToolNotFound(reference.to_string())),
            1 => {
                let client = self.get(&owners[0]).expect("owner just observed present");
                Ok((client, reference.to_string()))
            }
            _ => Err(HelmError::AmbiguousTool {
                tool: reference.to_string(),
                servers: owners,
            }),
        }
    }

    /// Call a tool, routing to the owning server. `name_or_ref` is either a
    /// bare tool name or `"server:tool"`.
    pub async fn call_tool(&self, name_or_ref: &str, args: Value) -> Result<Value, HelmError> {
        let (client, tool) = self.resolve(name_or_ref)?;
        client.call_tool(&tool, args).await
    }

    /// Push a context update to every connected client, returning each
    /// server's name paired with its result.
    pub async fn broadcast_context(&self, context: Value) -> Vec<(String, Result<(), HelmError>)> {
        let mut results = Vec::new();
        for entry in self.clients.iter() {
            let name = entry.key().clone();
            let client = entry.value().clone();
            let ctx = context.clone();
            results.push((name, client.update_context(ctx).await));
        }
        results
    }

    /// Shut down every client in the pool.
    pub async fn shutdown_all(&self) {
        for entry in self.clients.iter() {
            entry.value().shutdown().await;
        }
        self.clients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_has_no_tools() {
        let pool = ClientPool::new();
        assert!(pool.list_tools().is_empty());
        assert!(pool.names().is_empty());
    }
}
