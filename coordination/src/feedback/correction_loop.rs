//! Generate → validate → retry loop for code-producing workers.
//!
//! One run asks the generation client for a [`CandidateArtifact`], validates it
//! in two phases (imports alone, then the full artifact) and either accepts it
//! or feeds the failure back as a corrective message. The loop owner stops as
//! soon as any bound is hit or the backend sends the completion sentinel.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::OrchestrationError;
use crate::feedback::artifact::{ArtifactValidator, CandidateArtifact};
use crate::feedback::phase::{IllegalTransition, LoopPhase, PhaseMachine, PhaseRecord};
use crate::resilience::GenerationClient;
use crate::session::{Message, MessageLog};

/// Upper bounds for one loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopLimits {
    /// Total generation attempts, accepted or not.
    pub max_iterations: u32,
    /// Attempts that failed validation.
    pub max_error_iterations: u32,
}

impl LoopLimits {
    pub fn new(max_iterations: u32, max_error_iterations: u32) -> Self {
        Self {
            max_iterations,
            max_error_iterations,
        }
    }
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self::new(10, 10)
    }
}

/// What the next iteration should ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingFlag {
    /// Produce the next artifact or declare completion.
    Continue,
    /// The previous candidate was rejected; fix it.
    ErrorRetry,
    /// Sentinel observed.
    Done,
}

/// Counters for one loop run. Both counters only ever increase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopState {
    pub iterations: u32,
    pub error_iterations: u32,
    pub last_error: Option<String>,
    pub pending: PendingFlag,
}

impl LoopState {
    fn new() -> Self {
        Self {
            iterations: 0,
            error_iterations: 0,
            last_error: None,
            pending: PendingFlag::Continue,
        }
    }

    /// Termination predicate, checked before every iteration.
    pub fn should_stop(&self, limits: &LoopLimits) -> bool {
        self.iterations >= limits.max_iterations
            || self.error_iterations >= limits.max_error_iterations
            || self.pending == PendingFlag::Done
    }

    fn stop_reason(&self, limits: &LoopLimits) -> &'static str {
        if self.pending == PendingFlag::Done {
            "completion sentinel"
        } else if self.error_iterations >= limits.max_error_iterations {
            "max error iterations"
        } else {
            "max iterations"
        }
    }
}

/// Directive text appended to the log before each generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDirectives {
    /// Used after a rejected candidate.
    pub fix: String,
    /// Used otherwise. `{task}` is replaced with the task text.
    pub next: String,
}

impl Default for LoopDirectives {
    fn default() -> Self {
        Self {
            fix: "Now, try again. Structure the output with a description, an import \
                  section and a code block."
                .to_string(),
            next: "The user wants to complete this task: {task}\n\
                   Given the conversation so far, do you need to inspect the data or \
                   run more code before answering? If yes, generate the next piece of \
                   code. If no, set the description to exactly \"end\" and leave the \
                   imports and code block empty."
                .to_string(),
        }
    }
}

impl LoopDirectives {
    fn directive(&self, pending: PendingFlag, task: &str) -> String {
        match pending {
            PendingFlag::ErrorRetry => self.fix.clone(),
            _ => self.next.replace("{task}", task),
        }
    }
}

/// Everything a loop run produced, including partial progress on failure.
#[derive(Debug)]
pub struct CorrectionOutcome {
    /// Last accepted artifact, if any.
    pub artifact: Option<CandidateArtifact>,
    pub log: MessageLog,
    pub iterations: u32,
    pub error_iterations: u32,
    pub last_error: Option<String>,
    pub sentinel_seen: bool,
    pub transitions: Vec<PhaseRecord>,
    /// `FatalBackend`, `TransientBackend`, `Cancelled`, or `ValidationExhausted`
    /// when the bounds were hit with nothing accepted.
    pub failure: Option<OrchestrationError>,
}

impl CorrectionOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Bounded self-correction loop over one task.
pub struct CorrectionLoop<'a> {
    client: &'a GenerationClient,
    validator: &'a dyn ArtifactValidator,
    limits: LoopLimits,
    system_directive: String,
    directives: LoopDirectives,
}

impl<'a> CorrectionLoop<'a> {
    pub fn new(
        client: &'a GenerationClient,
        validator: &'a dyn ArtifactValidator,
        limits: LoopLimits,
    ) -> Self {
        Self {
            client,
            validator,
            limits,
            system_directive: String::new(),
            directives: LoopDirectives::default(),
        }
    }

    pub fn with_system_directive(mut self, directive: impl Into<String>) -> Self {
        self.system_directive = directive.into();
        self
    }

    pub fn with_directives(mut self, directives: LoopDirectives) -> Self {
        self.directives = directives;
        self
    }

    pub fn limits(&self) -> LoopLimits {
        self.limits
    }

    /// Run until a bound is hit, the sentinel arrives, or generation fails fatally.
    ///
    /// `log` is extended, never rewritten.
    pub async fn run(&self, task: &str, mut log: MessageLog) -> CorrectionOutcome {
        let mut state = LoopState::new();
        let mut machine = PhaseMachine::new();
        let mut accepted: Option<CandidateArtifact> = None;

        let failure = match self
            .drive(task, &mut log, &mut state, &mut machine, &mut accepted)
            .await
        {
            Ok(()) => {
                if accepted.is_none() && state.pending != PendingFlag::Done {
                    warn!(
                        iterations = state.iterations,
                        error_iterations = state.error_iterations,
                        "correction loop exhausted without an accepted artifact"
                    );
                    Some(OrchestrationError::ValidationExhausted {
                        iterations: state.iterations,
                        error_iterations: state.error_iterations,
                        last_error: state.last_error.clone(),
                    })
                } else {
                    None
                }
            }
            Err(e) => {
                warn!(error = %e, iterations = state.iterations, "correction loop aborted");
                Some(e)
            }
        };

        info!(
            iterations = state.iterations,
            error_iterations = state.error_iterations,
            accepted = accepted.is_some(),
            phases = %machine.summary(),
            "correction loop finished"
        );

        CorrectionOutcome {
            artifact: accepted,
            log,
            iterations: state.iterations,
            error_iterations: state.error_iterations,
            last_error: state.last_error,
            sentinel_seen: state.pending == PendingFlag::Done,
            transitions: machine.into_transitions(),
            failure,
        }
    }

    async fn drive(
        &self,
        task: &str,
        log: &mut MessageLog,
        state: &mut LoopState,
        machine: &mut PhaseMachine,
        accepted: &mut Option<CandidateArtifact>,
    ) -> Result<(), OrchestrationError> {
        loop {
            if state.should_stop(&self.limits) {
                machine
                    .finish(state.stop_reason(&self.limits))
                    .map_err(internal)?;
                return Ok(());
            }
            if machine.current() != LoopPhase::Generating {
                machine
                    .advance(LoopPhase::Generating, None)
                    .map_err(internal)?;
            }
            machine.set_iteration(state.iterations + 1);

            log.push(Message::user(self.directives.directive(state.pending, task)));

            let candidate = match self
                .client
                .invoke_structured::<CandidateArtifact>(
                    &self.system_directive,
                    log.as_slice().to_vec(),
                )
                .await
            {
                Ok(candidate) => candidate,
                Err(e) => {
                    machine.finish("generation failed").map_err(internal)?;
                    return Err(e);
                }
            };

            if candidate.is_sentinel() {
                debug!(iteration = state.iterations + 1, "completion sentinel received");
                state.iterations += 1;
                state.pending = PendingFlag::Done;
                continue;
            }

            machine
                .advance(LoopPhase::Validating, None)
                .map_err(internal)?;

            match self.check(&candidate).await {
                Ok(()) => {
                    machine
                        .advance(LoopPhase::Accept, Some("imports and body ok"))
                        .map_err(internal)?;
                    log.push(Message::assistant(candidate.render()));
                    state.iterations += 1;
                    state.pending = PendingFlag::Continue;
                    info!(iteration = state.iterations, "artifact accepted");
                    *accepted = Some(candidate);
                }
                Err(message) => {
                    machine
                        .advance(LoopPhase::Retry, Some(&message))
                        .map_err(internal)?;
                    log.push(Message::user(format!(
                        "{message}\n\nRejected solution:\n{}",
                        candidate.render()
                    )));
                    state.error_iterations += 1;
                    state.iterations += 1;
                    state.last_error = Some(message);
                    state.pending = PendingFlag::ErrorRetry;
                    warn!(
                        iteration = state.iterations,
                        error_iterations = state.error_iterations,
                        "artifact rejected"
                    );
                }
            }
        }
    }

    /// Imports alone first, then imports + body.
    async fn check(&self, candidate: &CandidateArtifact) -> Result<(), String> {
        self.validator
            .validate_imports(candidate)
            .await
            .map_err(|e| format!("Your code solution failed the import test: {e}"))?;
        self.validator
            .validate(candidate)
            .await
            .map_err(|e| format!("Your code failed the code execution test: {e}"))
    }
}

fn internal(err: IllegalTransition) -> OrchestrationError {
    OrchestrationError::Internal(err.into())
}
