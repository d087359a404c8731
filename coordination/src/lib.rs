//! Plan-driven multi-agent orchestration core
//!
//! This library provides:
//! - A plan model of ordered, typed steps and the router that walks it
//! - A bounded generate → validate → retry loop for code-producing workers
//! - A generation client with classified retries and exponential backoff
//! - Per-session workspace allocation
//!
//! # Architecture
//!
//! ```text
//! Orchestrator ─→ PlanRouter ─→ Planner | Researcher | Coder ─→ SessionPatch
//!      ↑                                       |                    |
//!      |                               CorrectionLoop               |
//!      |                                       |                    |
//!      |                              GenerationClient              |
//!      |                              (BackoffPolicy)               |
//!      └────────────────────── SessionState::apply ←────────────────┘
//! ```
//!
//! Concrete workers, the HTTP backend and the CLI live in `relay-agents`.

pub mod errors;
pub mod feedback;
pub mod orchestrator;
pub mod plan;
pub mod resilience;
pub mod router;
pub mod session;
pub mod workspace;

pub use errors::{BackendError, BackendErrorKind, ErrorCategory, OrchestrationError};

// Self-correction loop
pub use feedback::{
    AcceptAll, ArtifactValidator, CandidateArtifact, CorrectionLoop, CorrectionOutcome,
    LoopLimits, LoopPhase, PhaseMachine,
};

// Orchestration driver
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, PlannerDecision, PlanningWorker, ReportingWorker,
    RunOutcome, StepWorker, WorkerFailure, Workers,
};

pub use plan::{Plan, PlanProgress, Step, StepType};

// Generation client
pub use resilience::{
    BackoffPolicy, ErrorClass, GenerationBackend, GenerationClient, GenerationRequest,
    RetrySettings, RetryTrace,
};

pub use router::{PlanRouter, Route};
pub use session::{Message, MessageLog, Role, SessionPatch, SessionState};
pub use workspace::{SessionRegistry, WorkspaceAllocator, WorkspaceError};
