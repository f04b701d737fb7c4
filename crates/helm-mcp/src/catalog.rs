//! Tool and resource catalog entries discovered from a server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool a server advertises via `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool's name, unique per server (but not necessarily across a
    /// pool — see [`crate::pool::ClientPool`]).
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema for the tool's arguments.
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// One resource a server advertises via `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// The resource's URI.
    pub uri: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// MIME type, if known.
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// One prompt a server advertises via `prompts/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// The prompt's name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}
