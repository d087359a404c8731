//! Orchestration driver: router → worker → router until the planner is done.
//!
//! ## Lifecycle
//!
//! ```text
//! Orchestrator::run(state)
//!   → loop:
//!       check cancellation
//!       PlanRouter::next(plan)
//!         Planner    → PlanningWorker::plan    → replace plan | complete
//!         Researcher → StepWorker::execute     → record step result
//!         Coder      → StepWorker::execute     → record step result
//!   → Reporter       → ReportingWorker::report → final report
//!   → Terminate
//! ```
//!
//! Workers never mutate the session. They read a snapshot and hand back a
//! [`SessionPatch`]; the driver applies it to produce the next snapshot.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::OrchestrationError;
use crate::plan::Plan;
use crate::router::{PlanRouter, Route};
use crate::session::{Message, SessionPatch, SessionState};

// ── Worker traits ────────────────────────────────────────────────────────────

/// A worker error plus whatever progress the worker made before failing.
#[derive(Debug)]
pub struct WorkerFailure {
    pub error: OrchestrationError,
    pub patch: SessionPatch,
}

impl WorkerFailure {
    pub fn new(error: OrchestrationError, patch: SessionPatch) -> Self {
        Self { error, patch }
    }
}

impl From<OrchestrationError> for WorkerFailure {
    fn from(error: OrchestrationError) -> Self {
        Self::new(error, SessionPatch::new())
    }
}

/// Executes one plan step (research or code).
#[async_trait]
pub trait StepWorker: Send + Sync {
    fn name(&self) -> &str;

    /// Execute `state.plan.steps[step_index]`.
    ///
    /// The returned patch must record a result for `step_index`.
    async fn execute(
        &self,
        state: &SessionState,
        step_index: usize,
    ) -> Result<SessionPatch, WorkerFailure>;
}

/// What the planner decided.
#[derive(Debug, Clone)]
pub enum PlannerDecision {
    /// Replace the plan wholesale.
    Replan { plan: Plan, notes: Vec<Message> },
    /// Enough context gathered; move on to the report.
    Complete { notes: Vec<Message> },
}

/// Sole producer of plans and sole authority on completion.
#[async_trait]
pub trait PlanningWorker: Send + Sync {
    async fn plan(&self, state: &SessionState) -> Result<PlannerDecision, WorkerFailure>;
}

/// Writes the final report from the executed plan.
#[async_trait]
pub trait ReportingWorker: Send + Sync {
    async fn report(&self, state: &SessionState) -> Result<String, WorkerFailure>;
}

/// The four workers the driver dispatches to.
#[derive(Clone)]
pub struct Workers {
    pub planner: Arc<dyn PlanningWorker>,
    pub researcher: Arc<dyn StepWorker>,
    pub coder: Arc<dyn StepWorker>,
    pub reporter: Arc<dyn ReportingWorker>,
}

// ── Config / outcome ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Planner invocations allowed before the driver forces the report.
    pub max_plan_iterations: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_plan_iterations: 3,
        }
    }
}

/// Final session state plus either the report or the terminal error.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: SessionState,
    /// Every route taken, in order, ending in `Terminate` on success.
    pub routes: Vec<Route>,
    pub result: Result<String, OrchestrationError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn report(&self) -> Option<&str> {
        self.result.as_deref().ok()
    }

    pub fn error(&self) -> Option<&OrchestrationError> {
        self.result.as_ref().err()
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

pub struct Orchestrator {
    router: PlanRouter,
    workers: Workers,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(workers: Workers, config: OrchestratorConfig) -> Self {
        Self {
            router: PlanRouter::new(),
            workers,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drive `state` to a final report or a terminal error.
    pub async fn run(&self, state: SessionState) -> RunOutcome {
        let mut state = state;
        let mut routes = Vec::new();

        info!(session_id = %state.session_id, "orchestration starting");
        let result = self.drive(&mut state, &mut routes).await;

        match &result {
            Ok(_) => {
                routes.push(Route::Terminate);
                let progress = state.plan.as_ref().map(Plan::progress);
                info!(
                    session_id = %state.session_id,
                    routes = routes.len(),
                    executed = progress.map(|p| p.executed).unwrap_or(0),
                    "orchestration finished"
                );
            }
            Err(e) => error!(
                session_id = %state.session_id,
                category = %e.category(),
                error = %e,
                "orchestration failed"
            ),
        }

        RunOutcome {
            state,
            routes,
            result,
        }
    }

    async fn drive(
        &self,
        state: &mut SessionState,
        routes: &mut Vec<Route>,
    ) -> Result<String, OrchestrationError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(OrchestrationError::Cancelled(
                    "orchestration cancelled".to_string(),
                ));
            }

            let route = self.router.next(state.plan.as_ref());
            match route {
                Route::Planner => {
                    if state.plan_iterations >= self.config.max_plan_iterations {
                        warn!(
                            plan_iterations = state.plan_iterations,
                            "plan iteration limit reached, moving to report"
                        );
                        return self.finalize(state, routes).await;
                    }
                    routes.push(route);
                    let unhandled = state
                        .plan
                        .as_ref()
                        .and_then(Plan::first_unexecuted)
                        .filter(|step| !step.step_type.is_known())
                        .map(|step| {
                            OrchestrationError::UnknownStepType(step.step_type.to_string())
                        });
                    if let Some(error) = unhandled {
                        self.absorb(state, error.into())?;
                    }
                    match self.workers.planner.plan(state).await {
                        Ok(PlannerDecision::Replan { plan, notes }) => {
                            info!(
                                steps = plan.steps.len(),
                                title = %plan.title,
                                "planner produced plan"
                            );
                            apply(state, SessionPatch::new().replace_plan(plan).messages(notes))?;
                        }
                        Ok(PlannerDecision::Complete { notes }) => {
                            apply(state, SessionPatch::new().messages(notes))?;
                            return self.finalize(state, routes).await;
                        }
                        Err(failure) => self.absorb(state, failure)?,
                    }
                }
                Route::Researcher | Route::Coder => {
                    routes.push(route);
                    let index = state
                        .plan
                        .as_ref()
                        .and_then(Plan::first_unexecuted_index)
                        .ok_or_else(|| {
                            OrchestrationError::InvalidPatch(
                                "router selected a worker but no step is pending".to_string(),
                            )
                        })?;
                    let worker = if route == Route::Researcher {
                        &self.workers.researcher
                    } else {
                        &self.workers.coder
                    };
                    info!(worker = worker.name(), step = index, "dispatching step");

                    match worker.execute(state, index).await {
                        Ok(patch) => {
                            if !patch.records_step(index) {
                                return Err(OrchestrationError::InvalidPatch(format!(
                                    "{} did not record a result for step {index}",
                                    worker.name()
                                )));
                            }
                            apply(state, patch)?;
                        }
                        Err(failure) => self.absorb(state, failure)?,
                    }
                }
                Route::Reporter | Route::Terminate => return self.finalize(state, routes).await,
            }
        }
    }

    async fn finalize(
        &self,
        state: &mut SessionState,
        routes: &mut Vec<Route>,
    ) -> Result<String, OrchestrationError> {
        routes.push(Route::Reporter);
        let report = match self.workers.reporter.report(state).await {
            Ok(report) => report,
            Err(failure) => {
                apply(state, failure.patch)?;
                return Err(failure.error);
            }
        };
        apply(
            state,
            SessionPatch::new()
                .message(Message::assistant(report.clone()).with_name("reporter"))
                .final_report(report.clone()),
        )?;
        Ok(report)
    }

    /// Keep the worker's partial progress, then surface or swallow its error.
    fn absorb(
        &self,
        state: &mut SessionState,
        failure: WorkerFailure,
    ) -> Result<(), OrchestrationError> {
        apply(state, failure.patch)?;
        if failure.error.escapes_orchestration() {
            return Err(failure.error);
        }
        warn!(error = %failure.error, "routing error absorbed");
        state.message_log.push(
            Message::system(format!(
                "The next step could not be dispatched: {}. Revise the plan so every step \
                 is RESEARCH, PROCESSING or CODE_GENERATION.",
                failure.error
            ))
            .with_name("router"),
        );
        Ok(())
    }
}

/// Apply atomically: on error the state is left untouched.
fn apply(state: &mut SessionState, patch: SessionPatch) -> Result<(), OrchestrationError> {
    *state = state.clone().apply(patch)?;
    Ok(())
}
