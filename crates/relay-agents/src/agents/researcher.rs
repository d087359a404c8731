use async_trait::async_trait;
use coordination::{
    GenerationClient, Message, SessionPatch, SessionState, StepWorker, WorkerFailure,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::dispatched_step;
use crate::prompts::{step_message, RESEARCHER_DIRECTIVE};

/// Structured research output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResearchFindings {
    /// Concise summary of what was found.
    pub summary: String,
    /// URLs or references relied on.
    #[serde(default)]
    pub sources: Vec<String>,
}

impl ResearchFindings {
    pub fn render(&self) -> String {
        if self.sources.is_empty() {
            return self.summary.clone();
        }
        let sources: Vec<String> = self.sources.iter().map(|s| format!("- {s}")).collect();
        format!("{}\n\nSources:\n{}", self.summary, sources.join("\n"))
    }
}

pub struct Researcher {
    client: GenerationClient,
}

impl Researcher {
    pub fn new(client: GenerationClient) -> Self {
        Self { client }
    }
}

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
        let (step, total) = dispatched_step(state, step_index)?;
        let request = Message::user(step_message(
            step_index,
            total,
            &step.title,
            &step.description,
        ))
        .with_name("researcher");

        let mut messages = state.message_log.as_slice().to_vec();
        messages.push(request.clone());
        let findings: ResearchFindings = self
            .client
            .invoke_structured(RESEARCHER_DIRECTIVE, messages)
            .await
            .map_err(|e| {
                WorkerFailure::new(e, SessionPatch::new().message(request.clone()))
            })?;

        let rendered = findings.render();
        Ok(SessionPatch::new()
            .message(request)
            .message(Message::assistant(rendered.clone()).with_name("researcher"))
            .step_result(step_index, rendered))
    }
}
