use async_trait::async_trait;
use coordination::{GenerationClient, Message, ReportingWorker, SessionState, WorkerFailure};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::prompts::REPORTER_DIRECTIVE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FinalReport {
    /// The complete report in Markdown.
    pub content: String,
}

pub struct Reporter {
    client: GenerationClient,
}

impl Reporter {
    pub fn new(client: GenerationClient) -> Self {
        Self { client }
    }
}

/// Step results gathered into one user turn for the reporter.
pub fn results_digest(state: &SessionState) -> String {
    let mut out = format!("Task: {}\n", state.task);
    let Some(plan) = &state.plan else {
        out.push_str("\nNo plan was executed.");
        return out;
    };
    for (i, step) in plan.steps.iter().enumerate() {
        let result = step.execution_result.as_deref().unwrap_or("(not executed)");
        out.push_str(&format!("\n## {}. {}\n{}\n", i + 1, step.title, result));
    }
    out
}

#[async_trait]
impl ReportingWorker for Reporter {
    async fn report(&self, state: &SessionState) -> Result<String, WorkerFailure> {
        let mut messages = state.message_log.as_slice().to_vec();
        messages.push(Message::user(results_digest(state)));
        let report: FinalReport = self
            .client
            .invoke_structured(REPORTER_DIRECTIVE, messages)
            .await?;
        Ok(report.content)
    }
}
