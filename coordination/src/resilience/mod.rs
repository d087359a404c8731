//! Resilience: retrying calls to the generation backend.
//!
//! ```text
//! GenerationClient::invoke(request)
//!   ├─ attempt succeeds               → Ok(response)
//!   ├─ attempt fails, Fatal           → Err(FatalBackend)        (no retry)
//!   ├─ attempt fails, Retryable, left → sleep(delay(attempt)), try again
//!   └─ attempt fails, Retryable, none → Err(TransientBackend)    (last error)
//! ```

pub mod backoff;
pub mod client;

pub use backoff::{is_retryable_status, is_transient_message, BackoffPolicy, ErrorClass};
pub use client::{
    GenerationBackend, GenerationClient, GenerationRequest, RetrySettings, RetryTrace,
};
