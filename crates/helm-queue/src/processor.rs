//! Executes a parsed command: dispatch to a registered built-in, or spawn a
//! non-shell child process with captured output and an escalating-signal
//! timeout kill (spec.md §4.H).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use helm_core::EnvAllowList;
use helm_errors::HelmError;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

use crate::parser::ParsedCommand;

/// How long to wait after SIGTERM before escalating to SIGKILL.
const SOFT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Everything a command runs with: working directory, environment, and the
/// timeout the processor enforces.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Working directory for a spawned child; `None` inherits the current
    /// process's.
    pub cwd: Option<PathBuf>,
    /// Explicit environment variables for a spawned child.
    pub env: HashMap<String, String>,
    /// Allow-listed parent environment variables to also pass through.
    pub env_allow_list: EnvAllowList,
    /// Wall-clock budget before the processor kills the child.
    pub timeout: Duration,
}

impl ExecutionContext {
    /// A context with no environment passthrough and a 30s timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cwd: None,
            env: HashMap::new(),
            env_allow_list: EnvAllowList::none(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Captured result of running a command, whether built-in or spawned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code, if the process exited normally (built-ins set this to
    /// `Some(0)` on success).
    pub exit_code: Option<i32>,
    /// Wall-clock execution time.
    pub duration: Duration,
}

/// A command implemented in-process rather than spawned as a child.
#[async_trait]
pub trait BuiltinCommand: Send + Sync {
    /// The name this built-in is registered and dispatched under.
    fn name(&self) -> &str;

    /// Run the built-in with the given arguments.
    async fn run(&self, args: &[String], ctx: &ExecutionContext) -> Result<CommandOutput, HelmError>;
}

/// Dispatches parsed commands to built-ins or a spawned child process.
#[derive(Default)]
pub struct CommandProcessor {
    builtins: DashMap<String, std::sync::Arc<dyn BuiltinCommand>>,
}

impl CommandProcessor {
    /// A processor with no built-ins registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built-in under its own name.
    pub fn register_builtin(&self, builtin: std::sync::Arc<dyn BuiltinCommand>) {
        self.builtins.insert(builtin.name().to_string(), builtin);
    }

    /// Execute a parsed command. An empty command (blank line) is a no-op
    /// that succeeds with empty output.
    pub async fn execute(&self, parsed: &ParsedCommand, ctx: &ExecutionContext) -> Result<CommandOutput, HelmError> {
        if parsed.command.is_empty() {
            return Ok(CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            });
        }
        if let Some(builtin) = self.builtins.get(&parsed.command) {
            return builtin.run(&parsed.args, ctx).await;
        }
        spawn_and_capture(parsed, ctx).await
    }
}

async fn read_to_string(mut reader: impl tokio::io::AsyncRead + Unpin) -> String {
    let mut buf = String::new();
    let _ = reader.read_to_string(&mut buf).await;
    buf
}

async fn spawn_and_capture(parsed: &ParsedCommand, ctx: &ExecutionContext) -> Result<CommandOutput, HelmError> {
    let start = Instant::now();
    let mut command = Command::new(&parsed.command);
    command
        .args(&parsed.args)
        .env_clear()
        .envs(ctx.env_allow_list.build_child_env(&ctx.env))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &ctx.cwd {
        command.current_dir(cwd);
    }

    let mut child = command
        .spawn()
        .map_err(|e| HelmError::Internal(format!("failed to spawn {}: {e}", parsed.command)))?;
    let pid = child.id();
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");
    let stdout_task = tokio::spawn(read_to_string(stdout));
    let stderr_task = tokio::spawn(read_to_string(stderr));

    match tokio::time::timeout(ctx.timeout, child.wait()).await {
        Ok(status) => {
            let status = status.map_err(|e| HelmError::Internal(e.to_string()))?;
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(CommandOutput {
                stdout,
                stderr,
                exit_code: status.code(),
                duration: start.elapsed(),
            })
        }
        Err(_) => {
            escalate_kill(pid, &mut child).await;
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            Err(HelmError::Timeout(ctx.timeout))
        }
    }
}

async fn escalate_kill(pid: Option<u32>, child: &mut tokio::process::Child) {
    if let Some(pid) = pid {
        if signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
            && tokio::time::timeout(SOFT_KILL_GRACE, child.wait()).await.is_ok()
        {
            return;
        }
        warn!(pid, "soft kill did not stop child in time, sending SIGKILL");
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl BuiltinCommand for Echo {
        fn name(&self) -> &str {
            "echo-builtin"
        }

        async fn run(&self, args: &[String], _ctx: &ExecutionContext) -> Result<CommandOutput, HelmError> {
            Ok(CommandOutput {
                stdout: args.join(" "),
                exit_code: Some(0),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn empty_command_is_a_noop() {
        let processor = CommandProcessor::new();
        let parsed = ParsedCommand::default();
        let output = processor.execute(&parsed, &ExecutionContext::new()).await.unwrap();
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn dispatches_to_registered_builtin() {
        let processor = CommandProcessor::new();
        processor.register_builtin(std::sync::Arc::new(Echo));
        let parsed = ParsedCommand {
            command: "echo-builtin".to_string(),
            args: vec!["hi".to_string(), "there".to_string()],
        };
        let output = processor.execute(&parsed, &ExecutionContext::new()).await.unwrap();
        assert_eq!(output.stdout, "hi there");
    }

    #[tokio::test]
    async fn spawns_real_process_and_captures_output() {
        let processor = CommandProcessor::new();
        let parsed = ParsedCommand {
            command: "echo".to_string(),
            args: vec!["hello".to_string()],
        };
        let output = processor.execute(&parsed, &ExecutionContext::new()).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn timeout_kills_long_running_child() {
        let processor = CommandProcessor::new();
        let parsed = ParsedCommand {
            command: "sleep".to_string(),
            args: vec!["5".to_string()],
        };
        let mut ctx = ExecutionContext::new();
        ctx.timeout = Duration::from_millis(100);
        let result = processor.execute(&parsed, &ctx).await;
        assert!(matches!(result, Err(HelmError::Timeout(_))));
    }
}
