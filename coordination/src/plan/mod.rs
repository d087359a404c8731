//! Step & plan model.
//!
//! A [`Plan`] is an ordered list of typed [`Step`]s produced by the planning
//! worker. Step order is execution priority: the router always dispatches the
//! first step without an execution result and never reorders.

pub mod types;

pub use types::{Plan, PlanProgress, Step, StepType};
