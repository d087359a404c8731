//! Orchestration session state.
//!
//! Workers never mutate the session directly. They receive an immutable
//! [`SessionState`] snapshot and return a [`SessionPatch`]; the orchestrator
//! applies the patch to produce the next snapshot.
//!
//! ```text
//! snapshot(n) ──► worker ──► patch ──► snapshot(n).apply(patch) ──► snapshot(n+1)
//! ```

pub mod log;
pub mod state;

pub use log::{Message, MessageLog, Role};
pub use state::{SessionPatch, SessionState};
