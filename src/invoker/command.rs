//! Local process invoker.
//!
//! Each request spawns the configured program, feeds it input on stdin and
//! collects stdout/stderr. Exit status decides the outcome:
//! - exit 0: success, stdout is the output
//! - non-zero exit: runtime failure, code = exit status
//! - spawn failure, timeout, or signal: execution failure

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{FunctionInvoker, InvokeError, Invocation};
use crate::request::{CoordinatedRequest, CoordinatedResponse};
use crate::sequence::RunErr;

/// How request and response are exchanged with the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandProtocol {
    /// stdin = request body, stdout = output bytes.
    #[default]
    Raw,
    /// stdin = request JSON, stdout = response JSON, stderr may carry a RunErr JSON.
    Json,
}

/// Process invoker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Program to execute. Empty means "use the runnable path".
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    pub protocol: CommandProtocol,
    /// Per-invocation timeout in seconds.
    pub timeout_secs: u64,
    /// Working directory for the spawned process.
    pub working_dir: Option<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            protocol: CommandProtocol::Raw,
            timeout_secs: 30,
            working_dir: None,
        }
    }
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Invoker that runs a local executable per request.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    config: CommandConfig,
}

impl CommandInvoker {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    async fn run(&self, request: &CoordinatedRequest) -> Result<Invocation, InvokeError> {
        let input = match self.config.protocol {
            CommandProtocol::Raw => request.body.clone(),
            CommandProtocol::Json => request.to_json()?,
        };

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .env("MESHRUN_REQUEST_ID", &request.id)
            .env("MESHRUN_METHOD", &request.method)
            .env("MESHRUN_URL", &request.url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(InvokeError::Spawn)?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| InvokeError::Io(std::io::Error::other("stdin not captured")))?;

        let write_input = async move {
            match stdin.write_all(&input).await {
                // The function may exit without reading its input.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };

        let timeout = self.config.timeout();
        let (written, output) = tokio::time::timeout(timeout, async {
            tokio::join!(write_input, child.wait_with_output())
        })
        .await
        .map_err(|_| InvokeError::Timeout(timeout))?;

        written.map_err(InvokeError::Io)?;
        let output = output.map_err(InvokeError::Io)?;

        let code = output.status.code().ok_or(InvokeError::Killed)?;
        debug!(
            program = %self.config.program,
            code,
            stdout_len = output.stdout.len(),
            "Function process exited"
        );

        if code == 0 {
            return Ok(match self.config.protocol {
                CommandProtocol::Raw => Invocation::respond(&CoordinatedResponse::new(output.stdout)),
                CommandProtocol::Json => Invocation::Success(output.stdout),
            });
        }

        let run_err = match self.config.protocol {
            CommandProtocol::Json => serde_json::from_slice::<RunErr>(&output.stderr).ok(),
            CommandProtocol::Raw => None,
        }
        .unwrap_or_else(|| {
            RunErr::new(code, String::from_utf8_lossy(&output.stderr).trim().to_string())
        });

        Ok(Invocation::RuntimeFailure(run_err))
    }
}

#[async_trait]
impl FunctionInvoker for CommandInvoker {
    #[tracing::instrument(name = "invoker.command", skip_all, fields(request_id = %request.id))]
    async fn invoke(&self, request: &CoordinatedRequest) -> Invocation {
        match self.run(request).await {
            Ok(invocation) => invocation,
            Err(e) => {
                warn!(error = %e, program = %self.config.program, "Function invocation failed");
                e.into()
            }
        }
    }
}
