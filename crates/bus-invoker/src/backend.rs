use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{InvokerError, Result};

/// Raw output captured from a single worker run, before any
/// prompt-too-long or identity-failure heuristics are applied.
#[derive(Debug, Clone)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Abstracts over how a prompt is actually handed to the underlying LLM
/// worker. The default implementation shells out to an external binary;
/// a test or HTTP-backed implementation can substitute a different one.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    async fn run(
        &self,
        prompt: &str,
        model: &str,
        resume_session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<RawOutput>;
}

/// Invokes an external CLI binary (e.g. `claude --model <model> -p
/// <prompt>`), capturing stdout/stderr and honouring a timeout. Mirrors
/// the original daemon's subprocess invocation: the binary resumes a
/// named session via `--resume` rather than `--continue`, so multiple
/// daemons can keep independent conversation sessions.
pub struct SubprocessWorkerBackend {
    binary: String,
    cwd: String,
    resume_flag: String,
}

impl SubprocessWorkerBackend {
    pub fn new(binary: impl Into<String>, cwd: impl Into<String>) -> Self {
        Self { binary: binary.into(), cwd: cwd.into(), resume_flag: "--resume".to_string() }
    }
}

#[async_trait]
impl WorkerBackend for SubprocessWorkerBackend {
    async fn run(
        &self,
        prompt: &str,
        model: &str,
        resume_session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<RawOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--model").arg(model);
        if let Some(session_id) = resume_session_id {
            cmd.arg(&self.resume_flag).arg(session_id);
        }
        cmd.arg("-p").arg(prompt);
        cmd.current_dir(&self.cwd);
        cmd.kill_on_drop(true);

        debug!(binary = %self.binary, model, resume_session_id, "spawning worker process");

        let child = cmd
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(error = %e, "worker binary not found or failed to spawn");
                return Err(InvokerError::WorkerFailure(e.to_string()));
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "worker invocation timed out");
                return Err(InvokerError::Timeout(timeout.as_secs()));
            }
        };

        Ok(RawOutput {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        })
    }
}
