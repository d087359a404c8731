//! Backoff policy: retry delay schedule and transient-error classification.
//!
//! ```text
//! attempt 0: base        + jitter in [0.1, 0.5] * base
//! attempt 1: base * 2    + jitter in [0.1, 0.5] * base * 2
//! attempt n: base * 2^n  + jitter in [0.1, 0.5] * base * 2^n
//! ```
//!
//! Jitter only ever adds to the exponential term, so `delay(n) >= base * 2^n`
//! always holds. An optional ceiling clamps the final value.

use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{BackendError, BackendErrorKind};

/// Lower bound of the jitter factor applied to the exponential term.
pub const JITTER_MIN: f64 = 0.1;
/// Upper bound of the jitter factor applied to the exponential term.
pub const JITTER_MAX: f64 = 0.5;

/// Largest exponent used when computing `2^attempt`; keeps the multiplication finite.
const MAX_EXPONENT: u32 = 32;

/// Message fragments that mark an error as transient.
const TRANSIENT_VOCABULARY: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "connection aborted",
    "reset by peer",
    "broken pipe",
    "error sending request",
    "too many requests",
    "rate limit",
    "overloaded",
    "temporarily unavailable",
];

/// Whether a failed call may be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Never retried; returned to the caller immediately.
    Fatal,
    /// Retried after a backoff delay while attempts remain.
    Retryable,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal"),
            Self::Retryable => write!(f, "retryable"),
        }
    }
}

/// Exponential backoff with additive jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry, before jitter.
    pub base_delay: Duration,
    /// Optional ceiling on any single delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: None,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Classify a backend error as fatal or retryable.
    pub fn classify(&self, error: &BackendError) -> ErrorClass {
        if matches!(
            error.kind,
            BackendErrorKind::RateLimited | BackendErrorKind::Overloaded
        ) {
            return ErrorClass::Retryable;
        }
        // An explicit status is authoritative; the body text is only a hint
        // when the failure happened before any response arrived.
        if let Some(status) = error.status {
            return if is_retryable_status(status) {
                ErrorClass::Retryable
            } else {
                ErrorClass::Fatal
            };
        }
        if is_transient_message(&error.message) {
            ErrorClass::Retryable
        } else {
            ErrorClass::Fatal
        }
    }

    /// Exponential term `base * 2^attempt` without jitter.
    pub fn floor(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(MAX_EXPONENT) as i32);
        saturating_scale(self.base_delay, factor)
    }

    /// Delay before retrying after the zero-indexed `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        self.delay_with_jitter(attempt, factor)
    }

    /// Deterministic variant of [`delay`](Self::delay) for a given jitter factor.
    ///
    /// The factor is clamped into `[JITTER_MIN, JITTER_MAX]`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter_factor: f64) -> Duration {
        let floor = self.floor(attempt);
        let jitter = saturating_scale(floor, jitter_factor.clamp(JITTER_MIN, JITTER_MAX));
        let delay = floor.saturating_add(jitter);
        match self.max_delay {
            Some(ceiling) => delay.min(ceiling),
            None => delay,
        }
    }
}

/// `duration * factor`, clamped to `Duration::MAX` instead of panicking.
fn saturating_scale(duration: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Returns `true` for status codes that signal a transient backend condition.
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// Bare 5xx status code embedded in an error message.
static STATUS_5XX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b5\d{2}\b").expect("STATUS_5XX_RE regex should compile"));

/// Returns `true` if an error message matches the transient-failure vocabulary.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_VOCABULARY.iter().any(|needle| lower.contains(needle))
        || STATUS_5XX_RE.is_match(&lower)
}
