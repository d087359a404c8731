//! Task runner tests over a scripted backend and a temporary output root.
//!
//! Tests verify:
//! - A full run writes the report, `session.json`, metrics and telemetry
//! - Accepted code lands in the session workspace
//! - Workspace allocation survives a runner restart and can be reset
//! - A failing run still persists the partial session

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coordination::{BackendError, GenerationBackend, GenerationRequest, SessionState};
use relay_agents::{RelayConfig, TaskRequest, TaskRunner};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Answers by schema name; each schema has its own queue.
struct ScriptedBackend {
    responses: Mutex<Vec<(&'static str, VecDeque<Result<Value, BackendError>>)>>,
}

impl ScriptedBackend {
    fn new(script: Vec<(&'static str, Vec<Result<Value, BackendError>>)>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(
                script
                    .into_iter()
                    .map(|(name, queue)| (name, queue.into()))
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, BackendError> {
        let mut responses = self.responses.lock().unwrap();
        let queue = responses
            .iter_mut()
            .find(|(name, _)| *name == request.schema_name)
            .map(|(_, q)| q)
            .unwrap_or_else(|| panic!("unexpected schema {}", request.schema_name));
        queue
            .pop_front()
            .unwrap_or_else(|| panic!("script for {} ran dry", request.schema_name))
    }
}

fn read_session(workspace: &Path) -> SessionState {
    let content = std::fs::read_to_string(workspace.join("session.json")).unwrap();
    serde_json::from_str(&content).unwrap()
}

fn config(root: &Path, executor: &str) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.output_root = root.to_path_buf();
    config.executor.command = executor.to_string();
    config.retry.base_delay_ms = 1;
    config
}

fn happy_script() -> Vec<(&'static str, Vec<Result<Value, BackendError>>)> {
    vec![
        (
            "Plan",
            vec![
                Ok(json!({
                    "title": "Greeting",
                    "thought": "check, then print",
                    "has_enough_context": false,
                    "steps": [
                        { "title": "context", "description": "what to print", "step_type": "RESEARCH" },
                        { "title": "print", "description": "print it", "step_type": "CODE_GENERATION" }
                    ]
                })),
                Ok(json!({ "title": "done", "thought": "enough", "has_enough_context": true, "steps": [] })),
            ],
        ),
        (
            "ResearchFindings",
            vec![Ok(json!({ "summary": "print hello", "sources": [] }))],
        ),
        (
            "CandidateArtifact",
            vec![
                Ok(json!({ "description": "say hello", "import_section": "", "body": "echo hello" })),
                Ok(json!({ "description": "end", "import_section": "", "body": "" })),
            ],
        ),
        ("FinalReport", vec![Ok(json!({ "content": "# Report\nhello" }))]),
    ]
}

#[tokio::test]
async fn full_run_persists_session_and_code() {
    let dir = tempfile::tempdir().unwrap();
    let runner =
        TaskRunner::new(config(dir.path(), ""), ScriptedBackend::new(happy_script())).unwrap();

    let mut request = TaskRequest::new("say hello");
    request.session_id = Some("abc".into());
    let report = runner.run(request, CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome.report(), Some("# Report\nhello"));
    assert!(report.summary.success);
    assert_eq!(report.summary.steps_executed, 2);

    let saved = read_session(&report.workspace);
    assert_eq!(saved.session_id, "abc");
    assert_eq!(saved.final_report.as_deref(), Some("# Report\nhello"));

    assert_eq!(
        std::fs::read_to_string(report.workspace.join("plan1_step_2.py")).unwrap(),
        "echo hello"
    );
    assert!(report.workspace.join(".relay-metrics.json").exists());
    assert!(dir.path().join(".relay-telemetry.jsonl").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn process_validator_rejects_then_accepts() {
    let dir = tempfile::tempdir().unwrap();
    let mut script = happy_script();
    script[2].1 = vec![
        Ok(json!({ "description": "broken", "import_section": "", "body": "exit 4" })),
        Ok(json!({ "description": "fixed", "import_section": "", "body": "echo ok" })),
        Ok(json!({ "description": "end", "import_section": "", "body": "" })),
    ];
    let runner = TaskRunner::new(config(dir.path(), "sh"), ScriptedBackend::new(script)).unwrap();

    let report = runner
        .run(TaskRequest::new("say hello"), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.outcome.is_success(), "{:?}", report.outcome.error());
    let log = &report.outcome.state.message_log;
    assert!(log.iter().any(|m| {
        m.content.contains("failed the code execution test") && m.content.contains("exit code 4")
    }));
    let plan = report.outcome.state.plan.as_ref().unwrap();
    assert!(plan.steps[1]
        .execution_result
        .as_deref()
        .is_some_and(|r| r.contains("echo ok")));
}

#[tokio::test]
async fn workspace_survives_restart_until_reset() {
    let dir = tempfile::tempdir().unwrap();
    let first = TaskRunner::new(config(dir.path(), ""), ScriptedBackend::new(vec![])).unwrap();
    let path = first
        .allocator()
        .allocate_workspace("proj", "keep-me")
        .unwrap();
    // Persist the table the same way a run does.
    first.reset("unrelated").unwrap();

    let second = TaskRunner::new(config(dir.path(), ""), ScriptedBackend::new(vec![])).unwrap();
    assert_eq!(
        second.allocator().allocate_workspace("other", "keep-me").unwrap(),
        path
    );
    assert_eq!(second.reset("keep-me").unwrap(), Some(path));

    let third = TaskRunner::new(config(dir.path(), ""), ScriptedBackend::new(vec![])).unwrap();
    assert!(third.allocator().workspace("keep-me").is_err());
}

#[tokio::test]
async fn failed_run_still_saves_partial_session() {
    let dir = tempfile::tempdir().unwrap();
    let script = vec![(
        "Plan",
        vec![Err(BackendError::new("invalid api key").with_status(401))],
    )];
    let runner = TaskRunner::new(config(dir.path(), ""), ScriptedBackend::new(script)).unwrap();

    let report = runner
        .run(TaskRequest::new("anything"), CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.summary.success);
    assert_eq!(report.summary.error_category.as_deref(), Some("fatal_backend"));
    let err = report.final_report().unwrap_err().to_string();
    assert!(err.starts_with("task failed (fatal_backend)"), "{err}");
    let saved = read_session(&report.workspace);
    assert!(saved.plan.is_none());
    assert_eq!(saved.message_log.len(), 1);
}
