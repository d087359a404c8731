//! Concrete workers on top of the coordination worker traits.
//!
//! | Worker     | Trait             | Backend schema       |
//! |------------|-------------------|----------------------|
//! | Planner    | `PlanningWorker`  | `Plan`               |
//! | Researcher | `StepWorker`      | `ResearchFindings`   |
//! | Coder      | `StepWorker`      | `CandidateArtifact`  |
//! | Reporter   | `ReportingWorker` | `FinalReport`        |

pub mod coder;
pub mod planner;
pub mod reporter;
pub mod researcher;

use std::sync::Arc;

use coordination::{
    ArtifactValidator, GenerationClient, LoopLimits, OrchestrationError, SessionState, Step,
    WorkspaceAllocator, Workers,
};

pub use coder::Coder;
pub use planner::Planner;
pub use reporter::{FinalReport, Reporter};
pub use researcher::{ResearchFindings, Researcher};

/// Wire the four workers onto one generation client.
pub fn build_workers(
    client: GenerationClient,
    validator: Arc<dyn ArtifactValidator>,
    limits: LoopLimits,
    workspace: Option<WorkspaceAllocator>,
) -> Workers {
    let mut coder = Coder::new(client.clone(), validator, limits);
    if let Some(allocator) = workspace {
        coder = coder.with_workspace(allocator);
    }
    Workers {
        planner: Arc::new(Planner::new(client.clone())),
        researcher: Arc::new(Researcher::new(client.clone())),
        coder: Arc::new(coder),
        reporter: Arc::new(Reporter::new(client)),
    }
}

/// The step a worker was dispatched for, plus the plan length.
pub(crate) fn dispatched_step(
    state: &SessionState,
    index: usize,
) -> Result<(&Step, usize), OrchestrationError> {
    let plan = state
        .plan
        .as_ref()
        .ok_or_else(|| OrchestrationError::InvalidPatch("dispatched without a plan".into()))?;
    let step = plan.steps.get(index).ok_or_else(|| {
        OrchestrationError::InvalidPatch(format!("step index {index} out of range"))
    })?;
    Ok((step, plan.steps.len()))
}
