//! JSON-RPC 2.0 MCP transport, client state machine, and multi-server pool
//! (spec.md §4.A-§4.D).

mod catalog;
mod client;
mod codec;
mod config;
mod message;
mod pool;
mod state;
mod transport;

pub use catalog::{PromptDefinition, ResourceDefinition, ToolDefinition};
pub use client::McpClient;
pub use codec::Framing;
pub use config::ServerConfig;
pub use message::{JsonRpcErrorObject, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpMessage, RequestId};
pub use pool::{ClientPool, PooledToolDefinition};
pub use state::{ClientEvent, ClientState};
pub use transport::{Transport, TransportEvent};
