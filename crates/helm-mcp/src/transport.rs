//! Child-process transport: spawn, serialized writes, a dedicated reader
//! task, and stderr surfaced line-by-line (spec.md §4.B).

use std::process::Stdio;
use std::sync::Arc;

use helm_errors::HelmError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{self, DecodeOutcome, Framing};
use crate::config::ServerConfig;
use crate::message::McpMessage;

/// Events the transport surfaces to whoever is driving the client above it.
/// This is the Rust-idiomatic equivalent of spec.md's `onFrame(handler)`
/// callback registration: the caller owns an `mpsc::UnboundedReceiver`
/// instead of installing a callback.
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded frame arrived.
    Frame(McpMessage),
    /// A frame failed to parse; the codec has already resynchronized.
    ParseError(String),
    /// A line of the child's stderr.
    Stderr(String),
    /// The reader observed end-of-stream; the child has exited or the pipe
    /// closed.
    Closed {
        /// The child's exit code, if it could be determined.
        code: Option<i32>,
    },
}

/// A running MCP server child process and its serialized-write handle.
pub struct Transport {
    server_name: String,
    writer_tx: mpsc::UnboundedSender<McpMessage>,
    child: Arc<AsyncMutex<Child>>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_grace_period: std::time::Duration,
}

impl Transport {
    /// Spawn the child described by `config` and start its writer, reader,
    /// and stderr tasks. Returns the transport handle plus the event
    /// stream.
    pub fn spawn(config: &ServerConfig) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), HelmError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .env_clear()
            .envs(config.env_allow_list.build_child_env(&config.env))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| HelmError::SpawnFailed {
            server: config.name.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(writer_task(
            writer_rx,
            stdin,
            config.framing,
            config.name.clone(),
        )));
        tasks.push(tokio::spawn(reader_task(
            stdout,
            config.framing,
            event_tx.clone(),
        )));
        tasks.push(tokio::spawn(stderr_task(stderr, event_tx.clone())));

        let child = Arc::new(AsyncMutex::new(child));
        tasks.push(tokio::spawn(exit_watch_task(child.clone(), event_tx)));

        Ok((
            Self {
                server_name: config.name.clone(),
                writer_tx,
                child,
                tasks,
                shutdown_grace_period: config.shutdown_grace_period,
            },
            event_rx,
        ))
    }

    /// Serialize and send a frame to the child. Writes from concurrent
    /// callers never interleave because they all funnel through the same
    /// writer task.
    pub fn send_frame(&self, msg: McpMessage) -> Result<(), HelmError> {
        self.writer_tx.send(msg).map_err(|_| HelmError::BrokenPipe {
            server: self.server_name.clone(),
        })
    }

    /// Terminate the child. Waits up to the configured grace period for a
    /// clean exit, then force-kills.
    pub async fn close(&self) {
        let mut child = self.child.lock().await;
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        match tokio::time::timeout(self.shutdown_grace_period, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(server = %self.server_name, "grace period elapsed, force-killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn writer_task(
    mut rx: mpsc::UnboundedReceiver<McpMessage>,
    mut stdin: tokio::process::ChildStdin,
    framing: Framing,
    server_name: String,
) {
    while let Some(msg) = rx.recv().await {
        let bytes = match codec::encode(&msg, framing) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(server = %server_name, error = %e, "failed to encode outgoing frame");
                continue;
            }
        };
        if let Err(e) = stdin.write_all(&bytes).await {
            warn!(server = %server_name, error = %e, "broken pipe writing to server");
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
}

async fn reader_task(
    stdout: tokio::process::ChildStdout,
    framing: Framing,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut reader = BufReader::new(stdout);
    loop {
        match codec::decode_next(&mut reader, framing).await {
            DecodeOutcome::Message(msg) => {
                if event_tx.send(TransportEvent::Frame(msg)).is_err() {
                    break;
                }
            }
            DecodeOutcome::ParseError(e) => {
                if event_tx.send(TransportEvent::ParseError(e)).is_err() {
                    break;
                }
            }
            DecodeOutcome::Eof => break,
        }
    }
}

async fn stderr_task(
    stderr: tokio::process::ChildStderr,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(%line, "server stderr");
        if event_tx.send(TransportEvent::Stderr(line)).is_err() {
            break;
        }
    }
}

async fn exit_watch_task(
    child: Arc<AsyncMutex<Child>>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let status = {
        let mut child = child.lock().await;
        child.wait().await
    };
    let code = status.ok().and_then(|s| s.code());
    let _ = event_tx.send(TransportEvent::Closed { code });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::JsonRpcNotification;

    #[tokio::test]
    async fn spawn_echo_and_receive_stderr() {
        let config = ServerConfig::new("echo-server", "cat");
        let (transport, mut events) = Transport::spawn(&config).expect("spawn cat");

        transport
            .send_frame(McpMessage::Notification(JsonRpcNotification::new(
                "ping",
                None,
            )))
            .unwrap();

        let mut saw_echo = false;
        for _ in 0..10 {
            match tokio::time::timeout(std::time::Duration::from_secs(2), events.recv()).await {
                Ok(Some(TransportEvent::Frame(McpMessage::Notification(n)))) if n.method == "ping" => {
                    saw_echo = true;
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_echo, "expected cat to echo the frame back");
        transport.close().await;
    }

    #[tokio::test]
    async fn spawn_failed_for_missing_binary() {
        let config = ServerConfig::new("nonexistent", "definitely-not-a-real-binary-xyz");
        let result = Transport::spawn(&config);
        assert!(matches!(result, Err(HelmError::SpawnFailed { .. })));
    }
}
