//! Process-backed artifact validator.
//!
//! Runs the configured interpreter with the candidate source on stdin, under a
//! timeout. Phase one feeds the import section alone, phase two feeds imports
//! and body together.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use coordination::{ArtifactValidator, CandidateArtifact};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::ExecutorConfig;

/// Cap on the stderr/stdout excerpt fed back to the generator.
const MAX_FEEDBACK_CHARS: usize = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("executor command is empty or has unbalanced quotes: `{0}`")]
    BadCommand(String),

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("execution timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("exit code {code}: {output}")]
    Failed { code: i32, output: String },
}

#[derive(Debug, Clone)]
pub struct ProcessValidator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl ProcessValidator {
    pub fn new(command: &str, timeout: Duration) -> Result<Self, ExecError> {
        let mut parts = shlex::split(command)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ExecError::BadCommand(command.to_string()))?;
        if parts.is_empty() {
            return Err(ExecError::BadCommand(command.to_string()));
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
            timeout,
            working_dir: None,
        })
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self, ExecError> {
        Self::new(&config.command, Duration::from_secs(config.timeout_secs))
    }

    /// Run the interpreter from `dir`, e.g. the session workspace.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Feed `source` to the interpreter; `Ok(stdout)` on exit code 0.
    pub async fn run(&self, source: &str) -> Result<String, ExecError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let spawn_err = |source| ExecError::Spawn {
            program: self.program.clone(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_err)?;
        let stdin = child.stdin.take();
        let payload = source.as_bytes();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The child may exit before reading everything.
                match stdin.write_all(payload).await {
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok(())
        };
        // Feeding and waiting share one deadline so a child that never drains
        // stdin still times out.
        let exchange = async {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            fed?;
            output
        };

        let output = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result.map_err(spawn_err)?,
            Err(_) => {
                return Err(ExecError::Timeout {
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            debug!(program = %self.program, bytes = stdout.len(), "execution succeeded");
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.trim().is_empty() {
            stdout
        } else {
            stderr.into_owned()
        };
        Err(ExecError::Failed {
            code: output.status.code().unwrap_or(-1),
            output: tail(combined.trim(), MAX_FEEDBACK_CHARS),
        })
    }
}

/// Last `max` characters; tracebacks put the useful part at the end.
fn tail(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    s.chars().skip(count - max).collect()
}

#[async_trait]
impl ArtifactValidator for ProcessValidator {
    async fn validate_imports(&self, artifact: &CandidateArtifact) -> Result<(), String> {
        if artifact.import_section.trim().is_empty() {
            return Ok(());
        }
        self.run(&artifact.import_section)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn validate(&self, artifact: &CandidateArtifact) -> Result<(), String> {
        self.run(&artifact.source())
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
