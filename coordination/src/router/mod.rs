//! Plan router
//!
//! Chooses the next worker from the session's plan:
//!
//! ```text
//! Plan state                         | Route
//! -----------------------------------|-----------
//! none / zero steps                  | Planner
//! every step executed                | Planner
//! first unexecuted: RESEARCH         | Researcher
//! first unexecuted: PROCESSING       | Coder
//! first unexecuted: CODE_GENERATION  | Coder
//! first unexecuted: anything else    | Planner (warning)
//! ```

pub mod plan_router;

pub use plan_router::{route_for, PlanRouter, Route};
