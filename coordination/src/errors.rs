//! Orchestration error taxonomy with retry classification.
//!
//! Every error that can end an orchestration run is represented here. Callers
//! query `category()` / `is_retriable()` instead of matching on strings.
//!
//! ## Categories
//!
//! | Category           | Escapes the run | Handling                                  |
//! |--------------------|-----------------|-------------------------------------------|
//! | TransientBackend   | after exhaustion| retried by the backoff policy             |
//! | FatalBackend       | yes             | surfaced immediately                      |
//! | ValidationFailure  | after exhaustion| recovered by the self-correction loop     |
//! | RoutingFailure     | never           | noted in the log, planner revises the plan|
//! | Cancelled          | yes             | terminal                                  |
//! | Workspace          | yes             | terminal for the operation                |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse class of a backend failure as reported by the backend itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Explicit rate-limit signal (HTTP 429 or provider equivalent).
    RateLimited,
    /// Backend reports it is overloaded (HTTP 529 / 503).
    Overloaded,
    /// Transport-level failure before a response was received.
    Transport,
    /// Anything else: auth, malformed request, bad response body.
    Other,
}

/// A failure returned by a generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct BackendError {
    /// Human-readable error message.
    pub message: String,
    /// HTTP-like status code, when the backend produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub kind: BackendErrorKind,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            kind: BackendErrorKind::Other,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: BackendErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(message)
            .with_status(429)
            .with_kind(BackendErrorKind::RateLimited)
    }

    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(BackendErrorKind::Overloaded)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(BackendErrorKind::Transport)
    }
}

/// Error category used to decide whether an error escapes the orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    TransientBackend,
    FatalBackend,
    ValidationFailure,
    RoutingFailure,
    Cancelled,
    Workspace,
    Internal,
}

impl ErrorCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::TransientBackend | Self::ValidationFailure)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientBackend => write!(f, "transient_backend"),
            Self::FatalBackend => write!(f, "fatal_backend"),
            Self::ValidationFailure => write!(f, "validation_failure"),
            Self::RoutingFailure => write!(f, "routing_failure"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Workspace => write!(f, "workspace"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Unified error type for orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Retryable backend failures persisted through every allowed attempt.
    #[error("backend still failing after {attempts} attempt(s): {source}")]
    TransientBackend {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// Backend failure that must not be retried (auth, malformed request, schema violation).
    #[error("fatal backend error: {0}")]
    FatalBackend(#[source] BackendError),

    /// The self-correction loop hit its bound without an accepted artifact.
    #[error(
        "validation failed: no artifact accepted after {iterations} iteration(s) \
         ({error_iterations} failed validation){}",
        last_error_suffix(.last_error)
    )]
    ValidationExhausted {
        iterations: u32,
        error_iterations: u32,
        last_error: Option<String>,
    },

    /// A step carried a type no worker handles. Absorbed by the router.
    #[error("unrecognized step type `{0}`")]
    UnknownStepType(String),

    /// A worker returned a patch the session cannot apply.
    #[error("invalid session patch: {0}")]
    InvalidPatch(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Workspace(#[from] crate::workspace::WorkspaceError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_deref()
        .map(|e| format!("; last error: {e}"))
        .unwrap_or_default()
}

impl OrchestrationError {
    /// Classify this error into the orchestration taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TransientBackend { .. } => ErrorCategory::TransientBackend,
            Self::FatalBackend(_) => ErrorCategory::FatalBackend,
            Self::ValidationExhausted { .. } => ErrorCategory::ValidationFailure,
            Self::UnknownStepType(_) => ErrorCategory::RoutingFailure,
            Self::InvalidPatch(_) => ErrorCategory::Internal,
            Self::Cancelled(_) => ErrorCategory::Cancelled,
            Self::Workspace(_) => ErrorCategory::Workspace,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Returns `true` if some layer may still recover from this error.
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Returns `true` if this error ends the whole orchestration run.
    pub fn escapes_orchestration(&self) -> bool {
        !matches!(self.category(), ErrorCategory::RoutingFailure)
    }

    /// Wrap a response body that did not match the requested schema.
    pub fn schema_violation(detail: impl fmt::Display) -> Self {
        Self::FatalBackend(BackendError::new(format!(
            "response did not match the requested schema: {detail}"
        )))
    }
}
