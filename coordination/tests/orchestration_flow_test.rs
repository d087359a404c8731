//! End-to-end orchestration flow over a scripted generation backend.
//!
//! Tests verify:
//! - Research and code steps run in plan order, then the report is written
//! - The coder's correction loop recovers from a rejected artifact
//! - Transient backend failures are retried transparently
//! - Loop exhaustion ends the run with the step still recorded
//! - The message log only grows across the whole run

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use coordination::{
    ArtifactValidator, BackendError, CandidateArtifact, CorrectionLoop, ErrorCategory,
    GenerationBackend, GenerationClient, GenerationRequest, LoopLimits, Message, Orchestrator,
    OrchestratorConfig, Plan, PlannerDecision, PlanningWorker, ReportingWorker, RetrySettings,
    Route, SessionPatch, SessionState, StepWorker, WorkerFailure, Workers,
};

/// Backend that pops responses keyed by the request's schema name.
struct ScriptedBackend {
    queues: Mutex<Vec<(String, VecDeque<Result<Value, BackendError>>)>>,
    calls: Mutex<u32>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self {
            queues: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
        }
    }

    fn script(self, schema: &str, responses: Vec<Result<Value, BackendError>>) -> Self {
        self.queues
            .lock()
            .unwrap()
            .push((schema.to_string(), responses.into()));
        self
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, BackendError> {
        *self.calls.lock().unwrap() += 1;
        let mut queues = self.queues.lock().unwrap();
        let queue = queues
            .iter_mut()
            .find(|(name, _)| *name == request.schema_name)
            .map(|(_, q)| q)
            .unwrap_or_else(|| panic!("no script for schema {}", request.schema_name));
        queue
            .pop_front()
            .unwrap_or_else(|| panic!("script for {} ran dry", request.schema_name))
    }
}

/// Rejects bodies containing `bug`.
struct BugValidator;

#[async_trait]
impl ArtifactValidator for BugValidator {
    async fn validate_imports(&self, _artifact: &CandidateArtifact) -> Result<(), String> {
        Ok(())
    }

    async fn validate(&self, artifact: &CandidateArtifact) -> Result<(), String> {
        if artifact.body.contains("bug") {
            Err("Traceback: bug".to_string())
        } else {
            Ok(())
        }
    }
}

struct Planner {
    client: GenerationClient,
}

#[async_trait]
impl PlanningWorker for Planner {
    async fn plan(&self, state: &SessionState) -> Result<PlannerDecision, WorkerFailure> {
        if let Some(plan) = &state.plan {
            if plan.has_enough_context && plan.all_executed() {
                return Ok(PlannerDecision::Complete { notes: vec![] });
            }
        }
        let plan: Plan = self
            .client
            .invoke_structured("plan", state.message_log.as_slice().to_vec())
            .await?;
        Ok(PlannerDecision::Replan {
            plan: plan.into_fresh(),
            notes: vec![Message::assistant("planned").with_name("planner")],
        })
    }
}

struct Researcher;

#[async_trait]
impl StepWorker for Researcher {
    fn name(&self) -> &str {
        "researcher"
    }

    async fn execute(
        &self,
        state: &SessionState,
        step_index: usize,
    ) -> Result<SessionPatch, WorkerFailure> {
        let title = state
            .plan
            .as_ref()
            .map(|p| p.steps[step_index].title.clone())
            .unwrap_or_default();
        Ok(SessionPatch::new().step_result(step_index, format!("notes on {title}")))
    }
}

struct Coder {
    client: GenerationClient,
    limits: LoopLimits,
}

#[async_trait]
impl StepWorker for Coder {
    fn name(&self) -> &str {
        "coder"
    }

    async fn execute(
        &self,
        state: &SessionState,
        step_index: usize,
    ) -> Result<SessionPatch, WorkerFailure> {
        let start = state.message_log.len();
        let outcome = CorrectionLoop::new(&self.client, &BugValidator, self.limits)
            .run(&state.task, state.message_log.clone())
            .await;
        let added = outcome.log.since(start).to_vec();
        let result = outcome
            .artifact
            .as_ref()
            .map(CandidateArtifact::render)
            .unwrap_or_else(|| "no accepted artifact".to_string());
        let patch = SessionPatch::new()
            .messages(added)
            .step_result(step_index, result);
        match outcome.failure {
            Some(error) => Err(WorkerFailure::new(error, patch)),
            None => Ok(patch),
        }
    }
}

struct Reporter;

#[async_trait]
impl ReportingWorker for Reporter {
    async fn report(&self, state: &SessionState) -> Result<String, WorkerFailure> {
        let results: Vec<_> = state
            .plan
            .iter()
            .flat_map(|p| p.steps.iter())
            .filter_map(|s| s.execution_result.clone())
            .collect();
        Ok(results.join("\n---\n"))
    }
}

fn plan_json(has_enough_context: bool) -> Value {
    json!({
        "title": "Sales summary",
        "thought": "look up the format, then compute",
        "has_enough_context": has_enough_context,
        "steps": [
            { "title": "csv layout", "description": "find columns", "step_type": "RESEARCH" },
            { "title": "totals", "description": "sum sales", "step_type": "CODE_GENERATION" }
        ]
    })
}

fn artifact(body: &str) -> Value {
    json!({ "description": "sum sales", "import_section": "import csv", "body": body })
}

fn sentinel() -> Value {
    json!({ "description": "end", "import_section": "", "body": "" })
}

fn init_logs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn orchestrator(backend: Arc<ScriptedBackend>, limits: LoopLimits) -> Orchestrator {
    let client = GenerationClient::new(backend, RetrySettings::new(3, Duration::from_millis(100)));
    Orchestrator::new(
        Workers {
            planner: Arc::new(Planner {
                client: client.clone(),
            }),
            researcher: Arc::new(Researcher),
            coder: Arc::new(Coder { client, limits }),
            reporter: Arc::new(Reporter),
        },
        OrchestratorConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn full_run_recovers_from_rejection_and_transient_errors() {
    init_logs();
    let backend = Arc::new(
        ScriptedBackend::new()
            .script("Plan", vec![Ok(plan_json(true))])
            .script(
                "CandidateArtifact",
                vec![
                    Err(BackendError::rate_limited("429 Too Many Requests")),
                    Ok(artifact("total = bug")),
                    Ok(artifact("total = 42")),
                    Ok(sentinel()),
                ],
            ),
    );
    let orch = orchestrator(backend.clone(), LoopLimits::default());

    let outcome = orch.run(SessionState::new("summarize sales.csv")).await;

    assert!(outcome.is_success(), "{:?}", outcome.error());
    assert_eq!(
        outcome.routes,
        vec![
            Route::Planner,
            Route::Researcher,
            Route::Coder,
            Route::Planner,
            Route::Reporter,
            Route::Terminate,
        ]
    );
    let report = outcome.report().unwrap();
    assert!(report.contains("notes on csv layout"));
    assert!(report.contains("Code Block: total = 42"));
    assert!(outcome
        .state
        .message_log
        .iter()
        .any(|m| m.content.contains("Traceback: bug")));
    assert_eq!(*backend.calls.lock().unwrap(), 5);
}

#[tokio::test]
async fn loop_exhaustion_is_terminal_but_records_step() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .script("Plan", vec![Ok(plan_json(false))])
            .script(
                "CandidateArtifact",
                vec![Ok(artifact("bug")), Ok(artifact("bug again"))],
            ),
    );
    let orch = orchestrator(backend, LoopLimits::new(10, 2));

    let outcome = orch.run(SessionState::new("summarize sales.csv")).await;

    assert_eq!(
        outcome.error().map(|e| e.category()),
        Some(ErrorCategory::ValidationFailure)
    );
    let plan = outcome.state.plan.as_ref().unwrap();
    assert!(plan.all_executed());
    assert_eq!(
        plan.steps[1].execution_result.as_deref(),
        Some("no accepted artifact")
    );
    assert!(outcome.state.final_report.is_none());
}

#[tokio::test]
async fn fatal_planner_error_ends_run_without_plan() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .script("Plan", vec![Err(BackendError::new("invalid api key").with_status(401))]),
    );
    let orch = orchestrator(backend, LoopLimits::default());

    let outcome = orch.run(SessionState::new("task")).await;

    assert_eq!(
        outcome.error().map(|e| e.category()),
        Some(ErrorCategory::FatalBackend)
    );
    assert!(outcome.state.plan.is_none());
    assert_eq!(outcome.routes, vec![Route::Planner]);
}
