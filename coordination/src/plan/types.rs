//! Plan and step data types plus the read-only queries the router needs.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestrationError;

/// Kind of work a step represents; selects the worker that executes it.
///
/// Serialized as the upper-case tags `RESEARCH`, `PROCESSING` and
/// `CODE_GENERATION`. Any other tag is preserved as [`StepType::Unknown`] so
/// that routing can fail safe instead of rejecting the whole plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    Research,
    Processing,
    CodeGeneration,
    Unknown(String),
}

impl StepType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Research => "RESEARCH",
            Self::Processing => "PROCESSING",
            Self::CodeGeneration => "CODE_GENERATION",
            Self::Unknown(tag) => tag,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for StepType {
    fn from(tag: String) -> Self {
        match tag.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "RESEARCH" => Self::Research,
            "PROCESSING" => Self::Processing,
            "CODE_GENERATION" => Self::CodeGeneration,
            _ => Self::Unknown(tag),
        }
    }
}

impl From<StepType> for String {
    fn from(step_type: StepType) -> Self {
        step_type.as_str().to_string()
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    /// Short title of the step.
    pub title: String,
    /// What exactly has to be done or found out in this step.
    pub description: String,
    /// One of RESEARCH, PROCESSING or CODE_GENERATION.
    #[schemars(with = "String")]
    pub step_type: StepType,
    /// Whether the step needs a web search.
    #[serde(default)]
    pub need_search: bool,
    /// Leave empty; filled in by the worker that executes the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<String>,
}

impl Step {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        step_type: StepType,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            step_type,
            need_search: false,
            execution_result: None,
        }
    }

    /// A step is executed once any result, including an error summary, is recorded.
    pub fn is_executed(&self) -> bool {
        self.execution_result.is_some()
    }
}

/// Ordered steps for one task, as produced by the planning worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// Title of the overall plan.
    #[serde(default)]
    pub title: String,
    /// Reasoning behind the plan.
    #[serde(default)]
    pub thought: String,
    /// True when the gathered context is sufficient to write the final answer.
    #[serde(default)]
    pub has_enough_context: bool,
    /// Steps in execution order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Executed-vs-total step counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub executed: usize,
    pub total: usize,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// True iff every step has an execution result. Vacuously true when empty.
    pub fn all_executed(&self) -> bool {
        self.steps.iter().all(Step::is_executed)
    }

    /// First step, in order, without an execution result.
    pub fn first_unexecuted(&self) -> Option<&Step> {
        self.steps.iter().find(|step| !step.is_executed())
    }

    /// Index of [`first_unexecuted`](Self::first_unexecuted).
    pub fn first_unexecuted_index(&self) -> Option<usize> {
        self.steps.iter().position(|step| !step.is_executed())
    }

    /// Record the result for step `index`. Results are set exactly once.
    pub fn record_result(
        &mut self,
        index: usize,
        result: impl Into<String>,
    ) -> Result<(), OrchestrationError> {
        let total = self.steps.len();
        let step = self.steps.get_mut(index).ok_or_else(|| {
            OrchestrationError::InvalidPatch(format!(
                "step index {index} out of range (plan has {total} steps)"
            ))
        })?;
        if step.is_executed() {
            return Err(OrchestrationError::InvalidPatch(format!(
                "step {index} (`{}`) already has an execution result",
                step.title
            )));
        }
        step.execution_result = Some(result.into());
        Ok(())
    }

    /// Drop any results a planner may have filled in on a freshly generated plan.
    pub fn into_fresh(mut self) -> Self {
        for step in &mut self.steps {
            step.execution_result = None;
        }
        self
    }

    pub fn progress(&self) -> PlanProgress {
        PlanProgress {
            executed: self.steps.iter().filter(|s| s.is_executed()).count(),
            total: self.steps.len(),
        }
    }
}
