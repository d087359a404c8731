//! Self-correction loop phases and legal transition guards.
//!
//! Every phase change in the loop goes through [`PhaseMachine::advance`], which
//! rejects edges outside the graph below and records the rest for diagnostics.
//!
//! ```text
//! Generating → Validating | Done
//! Validating → Accept | Retry
//! Accept     → Generating | Done
//! Retry      → Generating | Done
//! ```

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Phases of one self-correction loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Appending a directive and asking the backend for a candidate.
    Generating,
    /// Running the two-phase validator on the candidate.
    Validating,
    /// Candidate passed; it is appended to the log.
    Accept,
    /// Candidate failed; a corrective message was appended.
    Retry,
    /// Terminal.
    Done,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generating => write!(f, "Generating"),
            Self::Validating => write!(f, "Validating"),
            Self::Accept => write!(f, "Accept"),
            Self::Retry => write!(f, "Retry"),
            Self::Done => write!(f, "Done"),
        }
    }
}

fn is_legal_transition(from: LoopPhase, to: LoopPhase) -> bool {
    use LoopPhase::*;

    matches!(
        (from, to),
        (Generating, Validating)
            // Sentinel, or the backend call failed
            | (Generating, Done)
            | (Validating, Accept)
            | (Validating, Retry)
            | (Accept, Generating)
            | (Accept, Done)
            | (Retry, Generating)
            | (Retry, Done)
    )
}

/// A single recorded phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub from: LoopPhase,
    pub to: LoopPhase,
    /// Loop iteration counter at the time of the transition.
    pub iteration: u32,
    /// Milliseconds since the machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: LoopPhase,
    pub to: LoopPhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal loop transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current loop phase and its transition log.
#[derive(Debug)]
pub struct PhaseMachine {
    current: LoopPhase,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<PhaseRecord>,
}

impl PhaseMachine {
    /// Start in `Generating`.
    pub fn new() -> Self {
        Self {
            current: LoopPhase::Generating,
            iteration: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> LoopPhase {
        self.current
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    pub fn advance(
        &mut self,
        to: LoopPhase,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            iteration = self.iteration,
            "loop transition"
        );

        self.transitions.push(PhaseRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Move to `Done` unless already there.
    pub fn finish(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        if self.current.is_terminal() {
            return Ok(());
        }
        self.advance(LoopPhase::Done, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[PhaseRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<PhaseRecord> {
        self.transitions
    }

    /// One-line history, e.g. `Generating → Validating → Retry → Generating`.
    pub fn summary(&self) -> String {
        let mut phases = vec![LoopPhase::Generating.to_string()];
        phases.extend(self.transitions.iter().map(|t| t.to.to_string()));
        phases.join(" → ")
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_then_finish() {
        let mut pm = PhaseMachine::new();
        pm.advance(LoopPhase::Validating, None).unwrap();
        pm.advance(LoopPhase::Accept, Some("imports and body ok")).unwrap();
        pm.set_iteration(1);
        pm.finish("max iterations").unwrap();

        assert!(pm.is_terminal());
        assert_eq!(pm.transitions().len(), 3);
        assert_eq!(pm.summary(), "Generating → Validating → Accept → Done");
    }

    #[test]
    fn retry_cycle() {
        let mut pm = PhaseMachine::new();
        pm.advance(LoopPhase::Validating, None).unwrap();
        pm.advance(LoopPhase::Retry, Some("import failed")).unwrap();
        pm.advance(LoopPhase::Generating, None).unwrap();
        pm.advance(LoopPhase::Validating, None).unwrap();
        pm.advance(LoopPhase::Accept, None).unwrap();
        assert_eq!(pm.current(), LoopPhase::Accept);
    }

    #[test]
    fn sentinel_goes_straight_to_done() {
        let mut pm = PhaseMachine::new();
        pm.advance(LoopPhase::Done, Some("sentinel")).unwrap();
        assert!(pm.is_terminal());
    }

    #[test]
    fn cannot_skip_validation() {
        let mut pm = PhaseMachine::new();
        let err = pm.advance(LoopPhase::Accept, None).unwrap_err();
        assert_eq!(err.from, LoopPhase::Generating);
        assert_eq!(err.to, LoopPhase::Accept);
    }

    #[test]
    fn cannot_leave_done() {
        let mut pm = PhaseMachine::new();
        pm.finish("stop").unwrap();
        assert!(pm.advance(LoopPhase::Generating, None).is_err());
        // finish is idempotent
        assert!(pm.finish("again").is_ok());
        assert_eq!(pm.transitions().len(), 1);
    }

    #[test]
    fn validating_cannot_finish_directly() {
        let mut pm = PhaseMachine::new();
        pm.advance(LoopPhase::Validating, None).unwrap();
        assert!(pm.finish("stop").is_err());
    }
}
