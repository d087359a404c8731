//! Session snapshot and the patches workers return.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::OrchestrationError;
use crate::plan::Plan;
use crate::session::log::{Message, MessageLog};

/// Immutable snapshot of one orchestration session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub message_log: MessageLog,
    /// Number of plans the planner has produced in this session.
    #[serde(default)]
    pub plan_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
}

impl SessionState {
    /// Start a session for `task`, seeding the log with the task as a user turn.
    pub fn new(task: impl Into<String>) -> Self {
        Self::with_session_id(Uuid::new_v4().to_string(), task)
    }

    pub fn with_session_id(session_id: impl Into<String>, task: impl Into<String>) -> Self {
        let task = task.into();
        let mut message_log = MessageLog::new();
        message_log.push(Message::user(task.clone()));
        Self {
            session_id: session_id.into(),
            task,
            plan: None,
            message_log,
            plan_iterations: 0,
            final_report: None,
        }
    }

    /// Produce the next snapshot by applying `patch`.
    ///
    /// Order of application: plan replacement, step result, messages, report.
    /// A step result always targets the plan as it stands after replacement.
    pub fn apply(mut self, patch: SessionPatch) -> Result<Self, OrchestrationError> {
        if let Some(plan) = patch.replace_plan {
            self.plan = Some(plan);
            self.plan_iterations += 1;
        }
        if let Some((index, result)) = patch.step_result {
            let plan = self.plan.as_mut().ok_or_else(|| {
                OrchestrationError::InvalidPatch(format!(
                    "result for step {index} but the session has no plan"
                ))
            })?;
            plan.record_result(index, result)?;
        }
        self.message_log.extend(patch.messages);
        if let Some(report) = patch.final_report {
            self.final_report = Some(report);
        }
        Ok(self)
    }
}

/// The only changes a worker may make to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPatch {
    /// Entries appended to the message log, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    /// `(step index, execution result)` for the step the worker executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_result: Option<(usize, String)>,
    /// Wholesale plan replacement (planner only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn step_result(mut self, index: usize, result: impl Into<String>) -> Self {
        self.step_result = Some((index, result.into()));
        self
    }

    pub fn replace_plan(mut self, plan: Plan) -> Self {
        self.replace_plan = Some(plan);
        self
    }

    pub fn final_report(mut self, report: impl Into<String>) -> Self {
        self.final_report = Some(report.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.step_result.is_none()
            && self.replace_plan.is_none()
            && self.final_report.is_none()
    }

    /// Whether this patch records a result for step `index`.
    pub fn records_step(&self, index: usize) -> bool {
        matches!(self.step_result, Some((i, _)) if i == index)
    }
}
