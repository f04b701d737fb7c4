//! The MCP client: typed RPC surface, connection state machine, pending
//! request table, reconnection with backoff, discovery, and context resync
//! (spec.md §4.C).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use helm_core::Priority;
use helm_errors::{ErrorContext, ErrorRouter, HelmError, Origin};
use helm_events::EventBus;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{PromptDefinition, ResourceDefinition, ToolDefinition};
use crate::config::{AuthHandshake, ServerConfig, StaleCatalogPolicy};
use crate::message::{JsonRpcErrorObject, JsonRpcNotification, JsonRpcRequest, McpMessage, RequestId};
use crate::state::{ClientEvent, ClientState};
use crate::transport::{Transport, TransportEvent};

const NOTIFICATION_BUFFER_CAPACITY: usize = 256;

struct Inner {
    config: ServerConfig,
    state: RwLock<ClientState>,
    transport: AsyncMutex<Option<Arc<Transport>>>,
    event_loop: AsyncMutex<Option<JoinHandle<()>>>,
    supervisor: AsyncMutex<Option<JoinHandle<()>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, HelmError>>>>,
    next_id: AtomicU64,
    tools: RwLock<Vec<ToolDefinition>>,
    resources: RwLock<Vec<ResourceDefinition>>,
    prompts: RwLock<Vec<PromptDefinition>>,
    last_context: RwLock<Option<Value>>,
    notification_buffer: Mutex<VecDeque<(String, Option<Value>)>>,
    events: EventBus<ClientEvent>,
    /// Bumped every time the tool/resource catalog is re-fetched, so an
    /// in-flight call can detect it ran against a now-stale catalog.
    catalog_generation: AtomicU64,
    error_router: RwLock<Option<Arc<ErrorRouter>>>,
}

/// A handle to one MCP server connection. Cheap to clone: every clone
/// shares the same underlying connection, pending-request table, and
/// caches.
#[derive(Clone)]
pub struct McpClient(Arc<Inner>);

enum ConnectOutcome {
    Connected,
    /// A transport-level failure (spawn failed, pipe broke, handshake
    /// timed out) — counts toward the reconnect budget.
    TransportFailed(HelmError),
    /// The server responded to `initialize` but rejected or malformed the
    /// handshake — terminal, no retry.
    HandshakeFailed(HelmError),
}

impl McpClient {
    /// Build a client for the given server config. Does not connect; call
    /// [`McpClient::connect`].
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self(Arc::new(Inner {
            config,
            state: RwLock::new(ClientState::Disconnected),
            transport: AsyncMutex::new(None),
            event_loop: AsyncMutex::new(None),
            supervisor: AsyncMutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            tools: RwLock::new(Vec::new()),
            resources: RwLock::new(Vec::new()),
            prompts: RwLock::new(Vec::new()),
            last_context: RwLock::new(None),
            notification_buffer: Mutex::new(VecDeque::new()),
            events: EventBus::new(),
            catalog_generation: AtomicU64::new(0),
            error_router: RwLock::new(None),
        }))
    }

    /// Attach an error router that the server's stderr output and other
    /// observed-but-not-fatal conditions are surfaced through (spec.md
    /// §4.B). Replaces any previously attached router.
    pub fn attach_error_router(&self, router: Arc<ErrorRouter>) {
        *self.0.error_router.write() = Some(router);
    }

    /// The server name this client was configured for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.config.name
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        *self.0.state.read()
    }

    /// Subscribe to client lifecycle and notification events.
    #[must_use]
    pub fn subscribe(&self) -> (helm_events::SubscriberId, Arc<helm_events::Inbox<ClientEvent>>) {
        self.0.events.subscribe()
    }

    /// Cached tool catalog as of the last discovery.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.0.tools.read().clone()
    }

    /// Look up a cached tool by name.
    #[must_use]
    pub fn get_tool(&self, name: &str) -> Option<ToolDefinition> {
        self.0.tools.read().iter().find(|t| t.name == name).cloned()
    }

    /// Cached resource catalog as of the last discovery.
    #[must_use]
    pub fn list_resources(&self) -> Vec<ResourceDefinition> {
        self.0.resources.read().clone()
    }

    /// Cached prompt catalog.
    #[must_use]
    pub fn list_prompts(&self) -> Vec<PromptDefinition> {
        self.0.prompts.read().clone()
    }

    /// Connect (or reconnect from scratch) and start the background
    /// supervisor that keeps the connection alive per the reconnect policy.
    /// Idempotent while already `Connecting`/`Connected`.
    pub async fn connect(&self) -> Result<(), HelmError> {
        if matches!(self.state(), ClientState::Connecting | ClientState::Connected) {
            return Ok(());
        }
        *self.0.state.write() = ClientState::Connecting;

        let first_attempt = self.try_connect_once().await;
        let result = match &first_attempt {
            ConnectOutcome::Connected => Ok(()),
            ConnectOutcome::TransportFailed(e) => Err(e.clone()),
            ConnectOutcome::HandshakeFailed(e) => Err(e.clone()),
        };

        match first_attempt {
            ConnectOutcome::Connected => {
                let client = self.clone();
                let handle = tokio::spawn(async move { client.supervise().await });
                *self.0.supervisor.lock().await = Some(handle);
            }
            ConnectOutcome::TransportFailed(_) if self.0.config.auto_reconnect => {
                *self.0.state.write() = ClientState::Reconnecting;
                let client = self.clone();
                let handle = tokio::spawn(async move { client.reconnect_loop(1).await });
                *self.0.supervisor.lock().await = Some(handle);
            }
            ConnectOutcome::TransportFailed(_) | ConnectOutcome::HandshakeFailed(_) => {
                *self.0.state.write() = ClientState::Error;
            }
        }

        result
    }

    /// Runs once the client is `Connected`: waits for the connection to
    /// drop, then either reconnects (auto-reconnect) or settles into
    /// `Error`/stays `Disconnected` (explicit shutdown already handled
    /// there).
    async fn supervise(&self) {
        self.wait_until_disconnected().await;
        if matches!(self.state(), ClientState::ShuttingDown | ClientState::Disconnected) {
            return;
        }
        self.fail_all_pending(HelmError::ConnectionLost {
            server: self.0.config.name.clone(),
        });
        let _ = self.0.events.publish(ClientEvent::Disconnected, Priority::High).await;

        if self.0.config.auto_reconnect {
            *self.0.state.write() = ClientState::Reconnecting;
            self.reconnect_loop(1).await;
        } else {
            *self.0.state.write() = ClientState::Error;
        }
    }

    async fn reconnect_loop(&self, mut attempt: u32) {
        loop {
            let delay = self.0.config.retry_policy.delay_for_attempt_with_jitter(
                attempt,
                rand::thread_rng().gen_range(0.0..1.0),
            );
            tokio::time::sleep(delay).await;
            *self.0.state.write() = ClientState::Connecting;

            match self.try_connect_once().await {
                ConnectOutcome::Connected => {
                    self.wait_until_disconnected().await;
                    if matches!(self.state(), ClientState::ShuttingDown | ClientState::Disconnected) {
                        return;
                    }
                    self.fail_all_pending(HelmError::ConnectionLost {
                        server: self.0.config.name.clone(),
                    });
                    let _ = self.0.events.publish(ClientEvent::Disconnected, Priority::High).await;
                    if !self.0.config.auto_reconnect {
                        *self.0.state.write() = ClientState::Error;
                        return;
                    }
                    *self.0.state.write() = ClientState::Reconnecting;
                    attempt = 1;
                }
                ConnectOutcome::HandshakeFailed(_) => {
                    *self.0.state.write() = ClientState::Error;
                    self.fail_all_pending(HelmError::HandshakeFailed {
                        server: self.0.config.name.clone(),
                        reason: "handshake rejected".to_string(),
                    });
                    return;
                }
                ConnectOutcome::TransportFailed(_) => {
                    if !self.0.config.retry_policy.should_retry(attempt - 1) {
                        *self.0.state.write() = ClientState::Error;
                        self.fail_all_pending(HelmError::ConnectionLost {
                            server: self.0.config.name.clone(),
                        });
                        return;
                    }
                    *self.0.state.write() = ClientState::Reconnecting;
                    attempt += 1;
                }
            }
        }
    }

    async fn try_connect_once(&self) -> ConnectOutcome {
        let (transport, events_rx) = match Transport::spawn(&self.0.config) {
            Ok(pair) => pair,
            Err(e) => return ConnectOutcome::TransportFailed(e),
        };
        *self.0.transport.lock().await = Some(Arc::new(transport));

        let client = self.clone();
        let event_loop = tokio::spawn(async move { client.run_event_loop(events_rx).await });
        *self.0.event_loop.lock().await = Some(event_loop);

        let mut handshake_params = json!({ "client": "helmsman", "protocolVersion": "2024-11-05" });
        if let Some(AuthHandshake::Bearer(token)) = &self.0.config.auth {
            handshake_params["authorization"] = json!({ "scheme": "bearer", "token": token });
        }
        match self
            .request_with_timeout("initialize", Some(handshake_params), self.0.config.request_timeout)
            .await
        {
            Ok(_) => {}
            Err(e @ (HelmError::ConnectionLost { .. } | HelmError::Timeout(_) | HelmError::BrokenPipe { .. })) => {
                self.teardown_transport().await;
                return ConnectOutcome::TransportFailed(e);
            }
            Err(e) => {
                self.teardown_transport().await;
                return ConnectOutcome::HandshakeFailed(e);
            }
        }

        self.refresh_tools().await.ok();
        self.refresh_resources().await.ok();

        if let Some(ctx) = self.0.last_context.read().clone() {
            self.send_notification("context/update", Some(ctx));
        }

        self.flush_notification_buffer().await;

        *self.0.state.write() = ClientState::Connected;
        let _ = self.0.events.publish(ClientEvent::Connected, Priority::High).await;
        info!(server = %self.0.config.name, "mcp client connected");
        ConnectOutcome::Connected
    }

    async fn teardown_transport(&self) {
        if let Some(handle) = self.0.event_loop.lock().await.take() {
            handle.abort();
        }
        if let Some(transport) = self.0.transport.lock().await.take() {
            transport.close().await;
        }
    }

    async fn wait_until_disconnected(&self) {
        let handle = self.0.event_loop.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Re-fetch the tools catalog and update the cache.
    pub async fn refresh_tools(&self) -> Result<Vec<ToolDefinition>, HelmError> {
        let result = self.request("tools/list", None).await?;
        let tools: Vec<ToolDefinition> = result
            .get("tools")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| HelmError::SchemaError(format!("malformed tools/list result: {e}")))?
            .unwrap_or_default();
        *self.0.tools.write() = tools.clone();
        self.0.catalog_generation.fetch_add(1, Ordering::SeqCst);
        let _ = self.0.events.publish(ClientEvent::ToolsChanged, Priority::Normal).await;
        Ok(tools)
    }

    /// Re-fetch the resources catalog and update the cache.
    pub async fn refresh_resources(&self) -> Result<Vec<ResourceDefinition>, HelmError> {
        let result = self.request("resources/list", None).await?;
        let resources: Vec<ResourceDefinition> = result
            .get("resources")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| HelmError::SchemaError(format!("malformed resources/list result: {e}")))?
            .unwrap_or_default();
        *self.0.resources.write() = resources.clone();
        let _ = self.0.events.publish(ClientEvent::ResourcesChanged, Priority::Normal).await;
        Ok(resources)
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, HelmError> {
        self.request("resources/read", Some(json!({ "uri": uri }))).await
    }

    /// Call a tool by name with the given arguments. If the server sends
    /// `tools/list_changed` while this call is in flight and the client is
    /// configured with `StaleCatalogPolicy::RevalidateBeforeComplete`, the
    /// result is discarded in favor of `ToolNotFound` unless the tool is
    /// still present in the catalog as of completion.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, HelmError> {
        let generation_at_start = self.0.catalog_generation.load(Ordering::SeqCst);
        let result = self
            .request("tools/call", Some(json!({ "name": name, "arguments": args })))
            .await?;

        if self.0.config.stale_catalog_policy == StaleCatalogPolicy::RevalidateBeforeComplete
            && self.0.catalog_generation.load(Ordering::SeqCst) != generation_at_start
            && self.get_tool(name).is_none()
        {
            return Err(HelmError::ToolNotFound(name.to_string()));
        }

        Ok(result)
    }

    /// Get a prompt by name.
    pub async fn get_prompt(&self, name: &str, args: Value) -> Result<Value, HelmError> {
        self.request("prompts/get", Some(json!({ "name": name, "arguments": args })))
            .await
    }

    /// Push a new context snapshot to the server, remembering it for
    /// replay on reconnect.
    pub async fn update_context(&self, context: Value) -> Result<(), HelmError> {
        *self.0.last_context.write() = Some(context.clone());
        if self.state().is_connected() {
            self.send_notification("context/update", Some(context));
        }
        Ok(())
    }

    /// Issue a request using the client's configured default timeout.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, HelmError> {
        self.request_with_timeout(method, params, self.0.config.request_timeout).await
    }

    async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, HelmError> {
        let transport = self.0.transport.lock().await.clone();
        let Some(transport) = transport else {
            return Err(HelmError::ConnectionLost {
                server: self.0.config.name.clone(),
            });
        };

        let id = self.0.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.0.pending.lock().insert(id, tx);

        let request = JsonRpcRequest::new(RequestId::Number(id), method, params);
        if let Err(e) = transport.send_frame(McpMessage::Request(request)) {
            self.0.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HelmError::Internal("response channel closed unexpectedly".into())),
            Err(_) => {
                self.0.pending.lock().remove(&id);
                Err(HelmError::Timeout(timeout))
            }
        }
    }

    fn send_notification(&self, method: &str, params: Option<Value>) {
        let transport = self.0.transport.try_lock();
        let Ok(transport) = transport else {
            warn!(server = %self.0.config.name, %method, "could not acquire transport lock to send notification");
            return;
        };
        if let Some(transport) = transport.as_ref() {
            let notification = JsonRpcNotification::new(method, params);
            if let Err(e) = transport.send_frame(McpMessage::Notification(notification)) {
                warn!(server = %self.0.config.name, %method, error = %e, "failed to send notification");
            }
        }
    }

    fn fail_all_pending(&self, error: HelmError) {
        let mut pending = self.0.pending.lock();
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(error.clone()));
        }
    }

    async fn resolve_pending(&self, response: crate::message::JsonRpcResponse) {
        let id = match &response.id {
            RequestId::Number(n) => Some(*n),
            RequestId::String(s) => s.parse::<u64>().ok(),
        };
        let Some(id) = id else {
            warn!(id = %response.id, "response id is not one this client ever generated");
            return;
        };
        let sender = self.0.pending.lock().remove(&id);
        let Some(sender) = sender else {
            warn!(id, "duplicate or unknown response id, dropping");
            let _ = self
                .0
                .events
                .publish(
                    ClientEvent::ProtocolAnomaly(format!("duplicate response id {id}")),
                    Priority::Normal,
                )
                .await;
            return;
        };

        let result = if let Some(error) = response.error {
            Err(map_rpc_error(error))
        } else {
            Ok(response.result.unwrap_or(Value::Null))
        };
        let _ = sender.send(result);
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        if !self.state().is_connected() {
            let mut buffer = self.0.notification_buffer.lock();
            if buffer.len() >= NOTIFICATION_BUFFER_CAPACITY {
                buffer.pop_front();
                warn!(server = %self.0.config.name, "notification buffer overflow, dropped oldest");
            }
            buffer.push_back((notification.method, notification.params));
            return;
        }
        self.dispatch_notification(notification.method, notification.params).await;
    }

    async fn dispatch_notification(&self, method: String, params: Option<Value>) {
        match method.as_str() {
            "tools/list_changed" => {
                let _ = self.refresh_tools().await;
            }
            "resources/list_changed" => {
                let _ = self.refresh_resources().await;
            }
            _ => {
                let _ = self
                    .0
                    .events
                    .publish(ClientEvent::Notification { method, params }, Priority::Normal)
                    .await;
            }
        }
    }

    async fn flush_notification_buffer(&self) {
        let buffered: Vec<_> = self.0.notification_buffer.lock().drain(..).collect();
        for (method, params) in buffered {
            self.dispatch_notification(method, params).await;
        }
    }

    async fn run_event_loop(self, mut events_rx: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events_rx.recv().await {
            match event {
                TransportEvent::Frame(McpMessage::Response(resp)) => self.resolve_pending(resp).await,
                TransportEvent::Frame(McpMessage::Notification(n)) => self.handle_notification(n).await,
                TransportEvent::Frame(McpMessage::Request(_)) => {
                    debug!(server = %self.0.config.name, "ignoring unsupported server-initiated request");
                }
                TransportEvent::ParseError(e) => {
                    let _ = self.0.events.publish(ClientEvent::ProtocolAnomaly(e), Priority::Normal).await;
                }
                TransportEvent::Stderr(line) => {
                    warn!(server = %self.0.config.name, severity = "medium", %line, "mcp server stderr");
                    if let Some(router) = self.0.error_router.read().clone() {
                        router.handle(&HelmError::Internal(line), &ErrorContext::new(Origin::Mcp));
                    }
                }
                TransportEvent::Closed { code } => {
                    debug!(server = %self.0.config.name, ?code, "transport closed");
                    break;
                }
            }
        }
    }

    /// Cancel all outstanding requests and tear down the connection from
    /// any state. Terminal: the client settles in `Disconnected`.
    pub async fn shutdown(&self) {
        *self.0.state.write() = ClientState::ShuttingDown;
        self.fail_all_pending(HelmError::Cancelled);
        self.teardown_transport().await;
        if let Some(handle) = self.0.supervisor.lock().await.take() {
            handle.abort();
        }
        *self.0.state.write() = ClientState::Disconnected;
    }
}

fn map_rpc_error(error: JsonRpcErrorObject) -> HelmError {
    match error.code {
        -32601 => HelmError::ToolNotFound(error.message),
        -32800 => HelmError::Cancelled,
        _ => HelmError::Internal(error.message),
    }
}
