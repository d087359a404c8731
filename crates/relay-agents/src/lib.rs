//! Concrete agents, HTTP backend, configuration and CLI glue for the
//! `coordination` orchestration core.

pub mod agents;
pub mod backend;
pub mod config;
pub mod executor;
pub mod prompts;
pub mod runner;
pub mod telemetry;

pub use config::{ConfigError, RelayConfig};
pub use runner::{TaskReport, TaskRequest, TaskRunner};
