//! Runs the external AI CLI for one prompt, either to completion or as a
//! line-by-line stream.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::core::jobs::{JobStatus, prompt_preview};
use crate::platform::{NativePlatform, Platform};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub program: String,
    pub args: Vec<String>,
    /// OS user to run the CLI as. `None` runs it as the server's own user.
    pub run_as: Option<String>,
    pub timeout: Duration,
    pub workdir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "--dangerously-skip-permissions".to_string(),
                "--print".to_string(),
            ],
            run_as: Some("clauderunner".to_string()),
            timeout: Duration::from_secs(300),
            workdir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionResult {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub return_code: Option<i32>,
}

impl ExecutionResult {
    fn failed(job_id: &str, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Error,
            output: None,
            error: Some(message.into()),
            return_code: None,
        }
    }
}

/// One NDJSON line of a streamed execution.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamChunk {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
}

impl StreamChunk {
    fn stdout(job_id: &str, line: String) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Running,
            kind: Some("stdout".to_string()),
            output: Some(line),
            error: None,
            return_code: None,
        }
    }

    fn finished(job_id: &str, status: JobStatus, error: Option<String>, return_code: Option<i32>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            kind: None,
            output: None,
            error,
            return_code,
        }
    }
}

#[derive(Clone)]
pub struct Executor {
    config: Arc<ExecutorConfig>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Builds the child process. With `run_as` every word is shell-quoted
    /// before being handed to the login shell, so the prompt stays one
    /// argument no matter what it contains.
    pub fn command(&self, prompt: &str) -> Command {
        let mut cmd = match &self.config.run_as {
            Some(user) => {
                let line = std::iter::once(self.config.program.as_str())
                    .chain(self.config.args.iter().map(String::as_str))
                    .chain(std::iter::once(prompt))
                    .map(NativePlatform::shell_quote)
                    .collect::<Vec<_>>()
                    .join(" ");
                NativePlatform::run_as_user(user, &line)
            }
            None => {
                let mut cmd = Command::new(&self.config.program);
                cmd.args(&self.config.args).arg(prompt);
                cmd
            }
        };
        if let Some(dir) = &self.config.workdir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Runs to completion. A non-zero exit code is still `completed`; the
    /// caller decides what the code means.
    pub async fn execute(&self, prompt: &str, job_id: &str) -> ExecutionResult {
        info!("[{}] Executing prompt: {}", job_id, prompt_preview(prompt));

        let child = match self.command(prompt).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("[{}] Failed to start {}: {}", job_id, self.config.program, e);
                return ExecutionResult::failed(job_id, format!("Failed to start {}: {}", self.config.program, e));
            }
        };

        match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let code = output.status.code();
                info!("[{}] Command finished with code {:?}", job_id, code);
                let error = if output.status.success() {
                    (!stderr.is_empty()).then_some(stderr)
                } else {
                    Some(failure_message(stderr, code))
                };
                ExecutionResult {
                    job_id: job_id.to_string(),
                    status: JobStatus::Completed,
                    output: Some(stdout),
                    error,
                    return_code: code,
                }
            }
            Ok(Err(e)) => {
                error!("[{}] Command failed: {}", job_id, e);
                ExecutionResult::failed(job_id, e.to_string())
            }
            Err(_) => {
                warn!("[{}] Command timed out", job_id);
                ExecutionResult::failed(job_id, self.timeout_message())
            }
        }
    }

    /// Streams stdout line by line, then a final `completed` or `error` chunk.
    /// Dropping the stream kills the child.
    pub fn execute_stream(&self, prompt: &str, job_id: &str) -> ReceiverStream<StreamChunk> {
        let (tx, rx) = mpsc::channel(64);
        let executor = self.clone();
        let prompt = prompt.to_string();
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            info!("[{}] Streaming prompt: {}", job_id, prompt_preview(&prompt));
            let last = match tokio::time::timeout(
                executor.config.timeout,
                executor.stream_child(&prompt, &job_id, &tx),
            )
            .await
            {
                Ok(Ok(chunk)) => chunk,
                Ok(Err(e)) => {
                    error!("[{}] Streaming command failed: {}", job_id, e);
                    StreamChunk::finished(&job_id, JobStatus::Error, Some(e.to_string()), None)
                }
                Err(_) => {
                    warn!("[{}] Streaming command timed out", job_id);
                    StreamChunk::finished(&job_id, JobStatus::Error, Some(executor.timeout_message()), None)
                }
            };
            let _ = tx.send(last).await;
        });

        ReceiverStream::new(rx)
    }

    async fn stream_child(&self, prompt: &str, job_id: &str, tx: &mpsc::Sender<StreamChunk>) -> anyhow::Result<StreamChunk> {
        let mut child = self.command(prompt).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("child stdout unavailable"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("child stderr unavailable"))?;

        // Drain stderr concurrently so a chatty child cannot block on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if tx.send(StreamChunk::stdout(job_id, line)).await.is_err() {
                warn!("[{}] Stream consumer went away, stopping command", job_id);
                anyhow::bail!("stream consumer disconnected");
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        let code = status.code();
        info!("[{}] Streaming command finished with code {:?}", job_id, code);
        Ok(if status.success() {
            StreamChunk::finished(job_id, JobStatus::Completed, None, code)
        } else {
            StreamChunk::finished(job_id, JobStatus::Error, Some(failure_message(stderr, code)), code)
        })
    }

    fn timeout_message(&self) -> String {
        format!(
            "Command execution timed out after {} seconds",
            self.config.timeout.as_secs()
        )
    }
}

/// A failed run always carries an error: stderr when the CLI wrote any,
/// otherwise the exit code.
fn failure_message(stderr: String, code: Option<i32>) -> String {
    if !stderr.trim().is_empty() {
        return stderr;
    }
    match code {
        Some(code) => format!("Command exited with code {}", code),
        None => "Command was terminated by a signal".to_string(),
    }
}
