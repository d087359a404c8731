//! Step-type dispatch over the current plan.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::plan::{Plan, StepType};

/// Where control goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Planner,
    Researcher,
    Coder,
    Reporter,
    Terminate,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Researcher => "researcher",
            Self::Coder => "coder",
            Self::Reporter => "reporter",
            Self::Terminate => "terminate",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker route for a step type, or `None` when no worker handles it.
///
/// `Processing` and `CodeGeneration` both go to the coder, which sees the step
/// and can tell them apart.
pub fn route_for(step_type: &StepType) -> Option<Route> {
    match step_type {
        StepType::Research => Some(Route::Researcher),
        StepType::Processing | StepType::CodeGeneration => Some(Route::Coder),
        StepType::Unknown(_) => None,
    }
}

/// Stateless router over the session's plan.
///
/// Never returns [`Route::Reporter`] or [`Route::Terminate`]; those belong to
/// the orchestrator driver once the planner declares completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanRouter;

impl PlanRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn next(&self, plan: Option<&Plan>) -> Route {
        let Some(plan) = plan.filter(|p| !p.is_empty()) else {
            debug!("no plan yet, routing to planner");
            return Route::Planner;
        };

        let Some(index) = plan.first_unexecuted_index() else {
            debug!(steps = plan.steps.len(), "all steps executed, routing to planner");
            return Route::Planner;
        };

        let step = &plan.steps[index];
        match route_for(&step.step_type) {
            Some(route) => {
                debug!(step = index, title = %step.title, %route, "dispatching step");
                route
            }
            None => {
                warn!(
                    step = index,
                    step_type = %step.step_type,
                    "unrecognized step type, falling back to planner"
                );
                Route::Planner
            }
        }
    }
}
