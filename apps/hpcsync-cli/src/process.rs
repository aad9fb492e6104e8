//! External command execution.
//!
//! Every process-backed adapter goes through a [`CommandRunner`], which is
//! the only place that knows whether commands run as the current user or
//! as a dedicated service user.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use hpcsync_connector::error::{ConnectorError, ConnectorResult};

/// Who a command runs as.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionContext {
    /// The user running hpcsync.
    #[default]
    Current,
    /// Another user, through `runuser -u <name> --`.
    AsUser(String),
}

impl ExecutionContext {
    pub fn from_run_as(run_as: Option<&str>) -> Self {
        match run_as {
            Some(user) if !user.is_empty() => ExecutionContext::AsUser(user.to_string()),
            _ => ExecutionContext::Current,
        }
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs external programs in an [`ExecutionContext`] with a timeout.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    context: ExecutionContext,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(context: ExecutionContext, timeout: Duration) -> Self {
        Self { context, timeout }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// The argv actually spawned for `program args...`.
    pub fn command_line(&self, program: &str, args: &[String]) -> Vec<String> {
        let mut argv = match &self.context {
            ExecutionContext::Current => Vec::with_capacity(args.len() + 1),
            ExecutionContext::AsUser(user) => {
                vec![
                    "runuser".to_string(),
                    "-u".to_string(),
                    user.clone(),
                    "--".to_string(),
                ]
            }
        };
        argv.push(program.to_string());
        argv.extend(args.iter().cloned());
        argv
    }

    /// Run a command with no input.
    pub async fn run(&self, program: &str, args: &[String]) -> ConnectorResult<CommandOutput> {
        self.spawn(program, args, None).await
    }

    /// Run a command feeding `input` on stdin.
    pub async fn run_with_input(
        &self,
        program: &str,
        args: &[String],
        input: &str,
    ) -> ConnectorResult<CommandOutput> {
        self.spawn(program, args, Some(input)).await
    }

    async fn spawn(
        &self,
        program: &str,
        args: &[String],
        input: Option<&str>,
    ) -> ConnectorResult<CommandOutput> {
        let argv = self.command_line(program, args);
        debug!(command = %argv.join(" "), "Running command");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ConnectorError::command_failed(program, format!("spawn failed: {e}")))?;

        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await.map_err(|e| {
                    ConnectorError::command_failed(program, format!("writing stdin: {e}"))
                })?;
            }
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result
                .map_err(|e| ConnectorError::command_failed(program, format!("wait failed: {e}")))?,
            Err(_) => {
                return Err(ConnectorError::command_failed(
                    program,
                    format!("timed out after {}s", self.timeout.as_secs()),
                ))
            }
        };

        let status = output.status.code().ok_or_else(|| {
            ConnectorError::command_failed(program, "terminated by a signal")
        })?;

        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
