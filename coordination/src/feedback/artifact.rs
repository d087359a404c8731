//! Candidate artifacts and the validator boundary.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Description value the backend uses to say "no further work".
pub const COMPLETION_SENTINEL: &str = "end";

/// Output of one code-generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CandidateArtifact {
    /// Description of the problem and the approach. Set to exactly "end" when no further code is needed.
    pub description: String,
    /// Import / dependency statements only.
    #[serde(default)]
    pub import_section: String,
    /// Code block, not including the import statements.
    #[serde(default)]
    pub body: String,
}

impl CandidateArtifact {
    pub fn new(
        description: impl Into<String>,
        import_section: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            import_section: import_section.into(),
            body: body.into(),
        }
    }

    pub fn sentinel() -> Self {
        Self::new(COMPLETION_SENTINEL, "", "")
    }

    /// Whether the backend declared there is nothing left to generate.
    pub fn is_sentinel(&self) -> bool {
        self.description.trim().eq_ignore_ascii_case(COMPLETION_SENTINEL)
    }

    /// Imports followed by the body, as handed to an executor.
    pub fn source(&self) -> String {
        if self.import_section.trim().is_empty() {
            self.body.clone()
        } else {
            format!("{}\n{}", self.import_section, self.body)
        }
    }

    /// Description, imports and body as one assistant turn.
    pub fn render(&self) -> String {
        format!(
            "{} \n Imports: {} \n Code Block: {}",
            self.description, self.import_section, self.body
        )
    }
}

/// Two-phase validator supplied by the execution collaborator.
///
/// `Err` carries a human-readable failure message that is fed back to the
/// generator verbatim.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactValidator: Send + Sync {
    /// Check the import section in isolation.
    async fn validate_imports(&self, artifact: &CandidateArtifact) -> Result<(), String>;

    /// Check the full artifact (imports + body).
    async fn validate(&self, artifact: &CandidateArtifact) -> Result<(), String>;
}

/// Validator that accepts everything. Only for runs with execution disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl ArtifactValidator for AcceptAll {
    async fn validate_imports(&self, _artifact: &CandidateArtifact) -> Result<(), String> {
        Ok(())
    }

    async fn validate(&self, _artifact: &CandidateArtifact) -> Result<(), String> {
        Ok(())
    }
}
