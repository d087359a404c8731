use async_trait::async_trait;
use coordination::{
    GenerationClient, Message, Plan, PlannerDecision, PlanningWorker, SessionState, WorkerFailure,
};
use tracing::info;

use crate::prompts::PLANNER_DIRECTIVE;

/// Produces plans and decides when the session has enough context.
pub struct Planner {
    client: GenerationClient,
}

impl Planner {
    pub fn new(client: GenerationClient) -> Self {
        Self { client }
    }
}

/// Assistant turn describing a plan, so later workers see it in the log.
pub fn render_plan(plan: &Plan) -> String {
    let mut out = format!("Plan: {}\n{}\n", plan.title, plan.thought);
    for (i, step) in plan.steps.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. [{}] {}: {}",
            i + 1,
            step.step_type,
            step.title,
            step.description
        ));
    }
    out
}

#[async_trait]
impl PlanningWorker for Planner {
    async fn plan(&self, state: &SessionState) -> Result<PlannerDecision, WorkerFailure> {
        if let Some(current) = &state.plan {
            if current.has_enough_context && current.all_executed() {
                info!("current plan is complete and sufficient");
                return Ok(PlannerDecision::Complete { notes: vec![] });
            }
        }

        let plan: Plan = self
            .client
            .invoke_structured(PLANNER_DIRECTIVE, state.message_log.as_slice().to_vec())
            .await?;

        let notes = vec![Message::assistant(render_plan(&plan)).with_name("planner")];
        if plan.has_enough_context {
            info!(title = %plan.title, "planner reports enough context");
            return Ok(PlannerDecision::Complete { notes });
        }
        Ok(PlannerDecision::Replan {
            plan: plan.into_fresh(),
            notes,
        })
    }
}
