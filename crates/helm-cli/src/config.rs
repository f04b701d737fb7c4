//! Configuration file loading (spec.md §6.3): a small allow-list of
//! environment variables, MCP server declarations, and ambient defaults.
//! Everything is optional — an absent file yields an all-defaults config.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use helm_core::EnvAllowList;
use helm_errors::HelmError;
use helm_mcp::{Framing, ServerConfig};
use serde::Deserialize;

/// One MCP server declaration in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    /// Name used for routing and diagnostics.
    pub name: String,
    /// Executable to spawn.
    pub command: String,
    /// Argument vector.
    #[serde(default)]
    pub args: Vec<String>,
    /// Explicit environment variables for this server's child process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Use LSP-style Content-Length framing instead of the newline-delimited
    /// default.
    #[serde(default)]
    pub content_length_framing: bool,
}

/// The CLI's full configuration, as loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// MCP servers to connect to at startup.
    pub servers: Vec<McpServerConfig>,
    /// Environment variable names allow-listed through to spawned
    /// processes (MCP servers and queued commands alike).
    pub env_allow_list: Vec<String>,
    /// Where to persist the state store, if anywhere.
    pub state_path: Option<PathBuf>,
    /// Where to persist the audit log, if anywhere.
    pub audit_path: Option<PathBuf>,
    /// Default wall-clock budget for a queued command.
    pub command_timeout_secs: u64,
    /// How many queued commands may run concurrently.
    pub queue_concurrency: usize,
    /// Whether REPL error output includes a details block below the
    /// one-line summary (spec.md §7).
    pub show_error_details: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            env_allow_list: Vec::new(),
            state_path: None,
            audit_path: None,
            command_timeout_secs: 30,
            queue_concurrency: 4,
            show_error_details: false,
        }
    }
}

impl Config {
    /// Load from `path`, or fall back to defaults if `path` is `None`.
    /// An explicitly given path that doesn't exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, HelmError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| HelmError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| HelmError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// The startup environment allow-list built from `env_allow_list`.
    #[must_use]
    pub fn env_allow_list(&self) -> EnvAllowList {
        EnvAllowList::new(self.env_allow_list.clone())
    }

    /// Convert the declared servers into `helm-mcp` configs ready to hand
    /// to a `ClientPool`.
    #[must_use]
    pub fn server_configs(&self) -> Vec<ServerConfig> {
        let allow_list = self.env_allow_list();
        self.servers
            .iter()
            .map(|s| {
                let framing = if s.content_length_framing {
                    Framing::ContentLength
                } else {
                    Framing::NewlineDelimited
                };
                let mut config = ServerConfig::new(&s.name, &s.command).with_args(s.args.clone()).with_framing(framing);
                config.env = s.env.clone();
                config.env_allow_list = allow_list.clone();
                config
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_yields_defaults() {
        let config = Config::load(None).unwrap();
        assert!(config.servers.is_empty());
        assert_eq!(config.command_timeout_secs, 30);
    }

    #[test]
    fn parses_a_minimal_toml_document() {
        let dir = std::env::temp_dir().join(format!("helmctl-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("helm.toml");
        std::fs::write(
            &path,
            r#"
            env_allow_list = ["PATH"]

            [[servers]]
            name = "fs"
            command = "mcp-fs"
            args = ["--root", "."]
            "#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].name, "fs");
        let servers = config.server_configs();
        assert_eq!(servers[0].args, vec!["--root".to_string(), ".".to_string()]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
