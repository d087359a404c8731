//! Self-correction feedback loop
//!
//! Bounded generate → validate → retry cycle used by code-producing workers:
//! - Ask the generation client for a candidate artifact
//! - Validate imports alone, then the full artifact
//! - Feed failures back into the message log and try again
//!
//! # Architecture
//!
//! ```text
//! directive → GenerationClient → CandidateArtifact → ArtifactValidator → accept
//!     ↑                                                     |
//!     └──────────────── corrective message ─────────────────┘
//! ```

pub mod artifact;
pub mod correction_loop;
pub mod phase;

pub use artifact::{AcceptAll, ArtifactValidator, CandidateArtifact, COMPLETION_SENTINEL};
pub use correction_loop::{
    CorrectionLoop, CorrectionOutcome, LoopDirectives, LoopLimits, LoopState, PendingFlag,
};
pub use phase::{IllegalTransition, LoopPhase, PhaseMachine, PhaseRecord};
