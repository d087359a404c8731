//! One-shot task execution: allocate the workspace, wire the workers, run the
//! orchestrator and persist the results.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use coordination::{
    AcceptAll, ArtifactValidator, GenerationBackend, GenerationClient, Orchestrator, RunOutcome,
    SessionRegistry, SessionState, WorkspaceAllocator,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::build_workers;
use crate::backend::OpenAiCompatBackend;
use crate::config::RelayConfig;
use crate::executor::ProcessValidator;
use crate::telemetry::{append_telemetry, write_run_metrics, RunSummary};

/// Allocation table persisted in the output root so sessions survive restarts.
const REGISTRY_FILE: &str = ".relay-sessions.json";

/// Inputs for one run.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub task: String,
    /// Reuse an existing session's workspace. A new id is generated when unset.
    pub session_id: Option<String>,
    pub project: String,
}

impl TaskRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            session_id: None,
            project: "project".into(),
        }
    }
}

/// Outcome of a run plus where its artifacts were written.
#[derive(Debug)]
pub struct TaskReport {
    pub outcome: RunOutcome,
    pub workspace: PathBuf,
    pub summary: RunSummary,
}

impl TaskReport {
    /// The final report, or the run's terminal error with its category.
    pub fn final_report(&self) -> Result<&str> {
        match &self.outcome.result {
            Ok(text) => Ok(text.as_str()),
            Err(e) => Err(anyhow::anyhow!("task failed ({}): {e}", e.category())),
        }
    }
}

pub struct TaskRunner {
    config: RelayConfig,
    backend: Arc<dyn GenerationBackend>,
    allocator: WorkspaceAllocator,
}

impl TaskRunner {
    /// Runner over the HTTP backend described by `config`.
    pub fn from_config(config: RelayConfig) -> Result<Self> {
        let backend = OpenAiCompatBackend::new(&config.backend)
            .context("Failed to build HTTP client for generation backend")?;
        Self::new(config, Arc::new(backend))
    }

    pub fn new(config: RelayConfig, backend: Arc<dyn GenerationBackend>) -> Result<Self> {
        std::fs::create_dir_all(&config.output_root).with_context(|| {
            format!(
                "Failed to create output root {}",
                config.output_root.display()
            )
        })?;
        let registry = load_registry(&config.output_root)?;
        let allocator = WorkspaceAllocator::new(config.output_root.clone(), registry);
        Ok(Self {
            config,
            backend,
            allocator,
        })
    }

    pub fn allocator(&self) -> &WorkspaceAllocator {
        &self.allocator
    }

    pub async fn run(&self, request: TaskRequest, cancel: CancellationToken) -> Result<TaskReport> {
        let started = Instant::now();
        let state = match &request.session_id {
            Some(id) => SessionState::with_session_id(id.clone(), request.task.clone()),
            None => SessionState::new(request.task.clone()),
        };
        let workspace = self
            .allocator
            .allocate_workspace(&request.project, &state.session_id)
            .context("Failed to allocate session workspace")?;
        self.save_registry()?;

        info!(
            session_id = %state.session_id,
            workspace = %workspace.display(),
            model = %self.config.backend.model,
            "Starting task"
        );

        let validator = self.validator(&workspace)?;
        let client = GenerationClient::new(self.backend.clone(), self.config.retry_settings())
            .with_cancellation(cancel.clone());
        let workers = build_workers(
            client,
            validator,
            self.config.loop_limits(),
            Some(self.allocator.clone()),
        );
        let orchestrator = Orchestrator::new(workers, self.config.orchestrator_config())
            .with_cancellation(cancel);

        let outcome = orchestrator.run(state).await;

        let session_path = workspace.join("session.json");
        let json = serde_json::to_string_pretty(&outcome.state)
            .context("Failed to serialize session state")?;
        std::fs::write(&session_path, json)
            .with_context(|| format!("Failed to write {}", session_path.display()))?;

        let summary = RunSummary::from_outcome(&outcome, started.elapsed().as_millis() as u64);
        write_run_metrics(&summary, &workspace);
        append_telemetry(&summary, &self.config.output_root);

        Ok(TaskReport {
            outcome,
            workspace,
            summary,
        })
    }

    /// Forget a session's workspace so the next run with that id starts fresh.
    pub fn reset(&self, session_id: &str) -> Result<Option<PathBuf>> {
        let removed = self.allocator.reset_workspace(session_id)?;
        self.save_registry()?;
        Ok(removed)
    }

    fn validator(&self, workspace: &Path) -> Result<Arc<dyn ArtifactValidator>> {
        if !self.config.executor.is_enabled() {
            warn!("Code execution disabled; every generated artifact will be accepted unchecked");
            return Ok(Arc::new(AcceptAll));
        }
        let validator = ProcessValidator::from_config(&self.config.executor)
            .context("Invalid executor command")?
            .with_working_dir(workspace);
        Ok(Arc::new(validator))
    }

    fn save_registry(&self) -> Result<()> {
        let path = self.config.output_root.join(REGISTRY_FILE);
        let entries = self.allocator.registry().snapshot()?;
        let json = serde_json::to_string_pretty(&entries)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn load_registry(output_root: &Path) -> Result<SessionRegistry> {
    let path = output_root.join(REGISTRY_FILE);
    if !path.exists() {
        return Ok(SessionRegistry::new());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let entries: HashMap<String, PathBuf> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(SessionRegistry::from_entries(entries))
}
