//! Engine subprocess management

use parking_lot::Mutex;
use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use terrable_core::{
    encode_code_unit, extract_result, is_completion_line, HandlerInvocation, ProtocolError,
    ResultEnvelope,
};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::DEFAULT_TIMEOUT_SECS;

/// Errors from driving an engine process
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to start engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No completion marker within {0:?}")]
    Timeout(Duration),

    #[error("Engine closed its output before completing the invocation")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Output of one invocation, up to (not including) the completion marker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    pub lines: Vec<String>,
}

impl Execution {
    /// All captured lines joined with newlines
    pub fn output(&self) -> String {
        self.lines.join("\n")
    }

    /// The Result Envelope printed during this invocation
    pub fn result(&self) -> Result<ResultEnvelope, ProtocolError> {
        extract_result(&self.output())
    }
}

/// A running engine subprocess
pub struct EngineProcess {
    /// The engine process
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    /// stderr lines collected in the background
    diagnostics: Arc<Mutex<Vec<String>>>,
    timeout: Duration,
}

impl EngineProcess {
    /// Start `program` with `args`
    pub async fn spawn<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(program.as_ref())
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ClientError::Spawn)?;

        let stdin = child.stdin.take().ok_or(ClientError::Closed)?;
        let stdout = child.stdout.take().ok_or(ClientError::Closed)?;
        let stderr = child.stderr.take().ok_or(ClientError::Closed)?;

        let diagnostics = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&diagnostics);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sink.lock().push(line);
            }
        });

        info!(pid = ?child.id(), "Started engine process");

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            diagnostics,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Change how long to wait for each completion marker
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `source` as one invocation and wait for its completion marker
    pub async fn execute(&mut self, source: &str) -> Result<Execution, ClientError> {
        self.send(encode_code_unit(source).as_bytes()).await?;
        self.read_execution().await
    }

    /// Invoke a handler through the invocation wrapper
    pub async fn invoke(
        &mut self,
        invocation: &HandlerInvocation,
    ) -> Result<ResultEnvelope, ClientError> {
        self.send(invocation.to_code_unit().as_bytes()).await?;
        let execution = self.read_execution().await?;
        Ok(execution.result()?)
    }

    /// Write raw bytes to the engine's stdin without framing
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let stdin = self.stdin.as_mut().ok_or(ClientError::Closed)?;
        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read stdout lines until the next completion marker
    pub async fn read_execution(&mut self) -> Result<Execution, ClientError> {
        let timeout = self.timeout;
        let execution = tokio::time::timeout(timeout, read_until_marker(&mut self.stdout))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;

        debug!(lines = execution.lines.len(), "Invocation completed");
        Ok(execution)
    }

    /// stderr lines received so far
    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.lock().clone()
    }

    /// Close stdin and wait for the engine to exit
    pub async fn shutdown(mut self) -> Result<ExitStatus, ClientError> {
        info!("Stopping engine process");
        drop(self.stdin.take());

        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.child.wait())
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
            .map_err(ClientError::from)
    }
}

async fn read_until_marker(
    stdout: &mut Lines<BufReader<ChildStdout>>,
) -> Result<Execution, ClientError> {
    let mut execution = Execution::default();
    while let Some(line) = stdout.next_line().await? {
        if is_completion_line(&line) {
            return Ok(execution);
        }
        execution.lines.push(line);
    }
    Err(ClientError::Closed)
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

impl std::fmt::Debug for EngineProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineProcess")
            .field("pid", &self.child.id())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
