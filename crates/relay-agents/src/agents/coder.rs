use std::sync::Arc;

use async_trait::async_trait;
use coordination::{
    ArtifactValidator, CorrectionLoop, CorrectionOutcome, GenerationClient, LoopLimits, Message,
    SessionPatch, SessionState, StepType, StepWorker, WorkerFailure, WorkspaceAllocator,
};
use tracing::{info, warn};

use super::dispatched_step;
use crate::prompts::{step_message, CODER_DIRECTIVE};

/// Runs the self-correction loop for PROCESSING and CODE_GENERATION steps.
pub struct Coder {
    client: GenerationClient,
    validator: Arc<dyn ArtifactValidator>,
    limits: LoopLimits,
    workspace: Option<WorkspaceAllocator>,
}

impl Coder {
    pub fn new(
        client: GenerationClient,
        validator: Arc<dyn ArtifactValidator>,
        limits: LoopLimits,
    ) -> Self {
        Self {
            client,
            validator,
            limits,
            workspace: None,
        }
    }

    /// Save accepted artifacts as `plan<p>_step_<n>.py` in the session workspace.
    pub fn with_workspace(mut self, allocator: WorkspaceAllocator) -> Self {
        self.workspace = Some(allocator);
        self
    }
}

/// Workspace file for an accepted artifact. Step numbers restart with every
/// plan, so the plan number keeps earlier files from being overwritten.
pub fn artifact_file_name(plan_iteration: u32, step_index: usize) -> String {
    format!("plan{plan_iteration}_step_{}.py", step_index + 1)
}

/// Execution result recorded on the step.
pub fn step_result(outcome: &CorrectionOutcome) -> String {
    match (&outcome.artifact, &outcome.failure) {
        (Some(artifact), None) => artifact.render(),
        (Some(artifact), Some(err)) => format!("{}\n\n(stopped early: {err})", artifact.render()),
        (None, Some(err)) => format!("error: {err}"),
        (None, None) => "No code was needed for this step.".to_string(),
    }
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
        let (step, total) = dispatched_step(state, step_index)?;
        if step.step_type == StepType::Processing {
            info!(step = step_index, "processing step handled by coder");
        }

        let mut log = state.message_log.clone();
        let start = log.len();
        log.push(
            Message::user(step_message(step_index, total, &step.title, &step.description))
                .with_name("coder"),
        );
        let task = format!("{} ({}: {})", state.task, step.title, step.description);

        let outcome = CorrectionLoop::new(&self.client, self.validator.as_ref(), self.limits)
            .with_system_directive(CODER_DIRECTIVE)
            .run(&task, log)
            .await;

        let result = step_result(&outcome);
        let mut patch = SessionPatch::new()
            .messages(outcome.log.since(start).to_vec())
            .step_result(step_index, result);

        if let (Some(allocator), Some(artifact)) = (&self.workspace, &outcome.artifact) {
            let file = artifact_file_name(state.plan_iterations, step_index);
            match allocator.write_file(&state.session_id, &file, &artifact.source()) {
                Ok(path) => {
                    patch = patch.message(
                        Message::system(format!("Saved code to {}", path.display()))
                            .with_name("coder"),
                    );
                }
                Err(e) => {
                    warn!(error = %e, file = %file, "could not save artifact");
                    return Err(WorkerFailure::new(e.into(), patch));
                }
            }
        }

        match outcome.failure {
            Some(error) => Err(WorkerFailure::new(error, patch)),
            None => Ok(patch),
        }
    }
}
