//! Logging setup and per-run summaries.
//!
//! Two output sinks for run summaries:
//! - `.relay-metrics.json` (in the session workspace): the run's summary, overwritten each run
//! - `.relay-telemetry.jsonl` (in the output root): append-only log of all runs

use std::path::Path;

use coordination::{Route, RunOutcome};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Compact record of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: String,
    pub task: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub routes: Vec<Route>,
    pub plan_iterations: u32,
    pub steps_executed: usize,
    pub steps_total: usize,
    pub messages: usize,
    pub elapsed_ms: u64,
    pub prompt_version: String,
    pub timestamp: String,
}

impl RunSummary {
    pub fn from_outcome(outcome: &RunOutcome, elapsed_ms: u64) -> Self {
        let state = &outcome.state;
        let progress = state.plan.as_ref().map(|p| p.progress());
        Self {
            session_id: state.session_id.clone(),
            task: state.task.clone(),
            success: outcome.is_success(),
            error_category: outcome.error().map(|e| e.category().to_string()),
            error: outcome.error().map(|e| e.to_string()),
            routes: outcome.routes.clone(),
            plan_iterations: state.plan_iterations,
            steps_executed: progress.map(|p| p.executed).unwrap_or(0),
            steps_total: progress.map(|p| p.total).unwrap_or(0),
            messages: state.message_log.len(),
            elapsed_ms,
            prompt_version: crate::prompts::PROMPT_VERSION.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Write the summary to `.relay-metrics.json` in the session workspace.
pub fn write_run_metrics(summary: &RunSummary, workspace: &Path) {
    let path = workspace.join(".relay-metrics.json");
    match serde_json::to_string_pretty(summary) {
        Ok(json) => match std::fs::write(&path, json) {
            Ok(()) => info!(path = %path.display(), "Wrote run metrics"),
            Err(e) => warn!("Failed to write run metrics: {e}"),
        },
        Err(e) => warn!("Failed to serialize run metrics: {e}"),
    }
}

/// Append the summary to `.relay-telemetry.jsonl` in the output root.
pub fn append_telemetry(summary: &RunSummary, output_root: &Path) {
    let path = output_root.join(".relay-telemetry.jsonl");
    match serde_json::to_string(summary) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append telemetry: {e}");
                    }
                }
                Err(e) => warn!("Failed to open telemetry file: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize telemetry: {e}"),
    }
}
