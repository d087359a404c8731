//! Generation client: a backend call wrapped in the backoff policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::{BackendError, OrchestrationError};
use crate::resilience::backoff::{BackoffPolicy, ErrorClass};
use crate::session::Message;

/// Default number of attempts per invocation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// One request to the generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// System-level instruction for this call.
    pub system_directive: String,
    /// JSON schema the response must match.
    pub schema: Value,
    /// Name of the schema, used by backends that require one.
    pub schema_name: String,
    /// Conversation context, oldest first.
    pub messages: Vec<Message>,
}

impl GenerationRequest {
    /// Build a request whose response schema is derived from `T`.
    pub fn structured<T: JsonSchema>(
        system_directive: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        let schema = schemars::schema_for!(T);
        Self {
            system_directive: system_directive.into(),
            schema: serde_json::to_value(schema).unwrap_or_default(),
            schema_name: T::schema_name(),
            messages,
        }
    }
}

/// The external capability that turns a request into a structured result.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str {
        "backend"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Value, BackendError>;
}

/// Attempt bound and backoff configuration for a [`GenerationClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub policy: BackoffPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            policy: BackoffPolicy::default(),
        }
    }
}

impl RetrySettings {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            policy: BackoffPolicy::new(base_delay),
        }
    }
}

/// What one `invoke` call did: attempts made and each delay slept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryTrace {
    pub attempts: u32,
    pub delays: Vec<Duration>,
}

/// Backend wrapper with bounded retries and exponential backoff.
///
/// Cheap to clone; each `invoke` waits independently of every other call.
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    settings: RetrySettings,
    cancel: Option<CancellationToken>,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, settings: RetrySettings) -> Self {
        Self {
            backend,
            settings,
            cancel: None,
        }
    }

    /// Abort pending and future invocations when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Call the backend, retrying retryable failures.
    pub async fn invoke(&self, request: &GenerationRequest) -> Result<Value, OrchestrationError> {
        self.invoke_traced(request).await.0
    }

    /// Like [`invoke`](Self::invoke), also returning what the retry loop did.
    pub async fn invoke_traced(
        &self,
        request: &GenerationRequest,
    ) -> (Result<Value, OrchestrationError>, RetryTrace) {
        let mut trace = RetryTrace::default();
        let max_attempts = self.settings.max_attempts.max(1);
        let policy = &self.settings.policy;

        for attempt in 0..max_attempts {
            if self.is_cancelled() {
                return (Err(cancelled()), trace);
            }
            trace.attempts += 1;
            debug!(
                backend = self.backend.name(),
                attempt = attempt + 1,
                max_attempts,
                "generation attempt"
            );

            let err = match self.backend.generate(request).await {
                Ok(value) => return (Ok(value), trace),
                Err(err) => err,
            };

            if policy.classify(&err) == ErrorClass::Fatal {
                error!(
                    backend = self.backend.name(),
                    status = ?err.status,
                    error = %err,
                    "non-retryable backend error"
                );
                return (Err(OrchestrationError::FatalBackend(err)), trace);
            }

            if attempt + 1 == max_attempts {
                error!(
                    backend = self.backend.name(),
                    attempts = trace.attempts,
                    error = %err,
                    "backend failed after all attempts"
                );
                return (
                    Err(OrchestrationError::TransientBackend {
                        attempts: trace.attempts,
                        source: err,
                    }),
                    trace,
                );
            }

            let delay = policy.delay(attempt);
            warn!(
                backend = self.backend.name(),
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                status = ?err.status,
                error = %err,
                "retryable backend error, backing off"
            );
            trace.delays.push(delay);
            if !self.sleep(delay).await {
                return (Err(cancelled()), trace);
            }
        }

        // max_attempts >= 1, so the loop always returns.
        (Err(cancelled()), trace)
    }

    /// Invoke and decode the response into `T`, deriving the schema from `T`.
    ///
    /// A response that does not match the schema is a fatal backend error.
    pub async fn invoke_structured<T>(
        &self,
        system_directive: &str,
        messages: Vec<Message>,
    ) -> Result<T, OrchestrationError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let request = GenerationRequest::structured::<T>(system_directive, messages);
        let value = self.invoke(&request).await?;
        serde_json::from_value(value).map_err(OrchestrationError::schema_violation)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    /// Sleep for `delay`; returns `false` if cancelled first.
    async fn sleep(&self, delay: Duration) -> bool {
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

fn cancelled() -> OrchestrationError {
    OrchestrationError::Cancelled("generation cancelled".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::errors::ErrorCategory;

    /// Backend that replays a fixed script of results.
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<Value, BackendError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<Value, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Value, BackendError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::new("script exhausted")))
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_directive: "test".into(),
            schema: Value::Null,
            schema_name: "Test".into(),
            messages: vec![],
        }
    }

    fn client(backend: Arc<ScriptedBackend>, max_attempts: u32) -> GenerationClient {
        GenerationClient::new(
            backend,
            RetrySettings::new(max_attempts, Duration::from_millis(100)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_retryable_failures() {
        let n = 4;
        let mut script: Vec<_> = (0..n - 1)
            .map(|_| Err(BackendError::rate_limited("429 too many requests")))
            .collect();
        script.push(Ok(serde_json::json!({"ok": true})));
        let backend = ScriptedBackend::new(script);

        let (result, trace) = client(backend.clone(), n).invoke_traced(&request()).await;

        assert_eq!(result.unwrap(), serde_json::json!({"ok": true}));
        assert_eq!(trace.attempts, n);
        assert_eq!(trace.delays.len() as u32, n - 1);
        assert_eq!(backend.calls(), n);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_with_last_error() {
        let n = 3;
        let script = vec![
            Err(BackendError::new("connection reset")),
            Err(BackendError::new("request timed out")),
            Err(BackendError::overloaded("overloaded (last)")),
        ];
        let backend = ScriptedBackend::new(script);

        let (result, trace) = client(backend.clone(), n).invoke_traced(&request()).await;

        match result {
            Err(OrchestrationError::TransientBackend { attempts, source }) => {
                assert_eq!(attempts, n);
                assert_eq!(source.message, "overloaded (last)");
            }
            other => panic!("expected TransientBackend, got {other:?}"),
        }
        assert_eq!(trace.attempts, n);
        // No delay after the final attempt.
        assert_eq!(trace.delays.len() as u32, n - 1);
        assert_eq!(backend.calls(), n);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_short_circuits() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::new("invalid api key").with_status(401)),
            Ok(Value::Null),
        ]);

        let (result, trace) = client(backend.clone(), 5).invoke_traced(&request()).await;

        let err = result.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::FatalBackend);
        assert_eq!(trace.attempts, 1);
        assert!(trace.delays.is_empty());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_follow_policy_floor() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::new("503 service unavailable")),
            Err(BackendError::new("503 service unavailable")),
            Ok(Value::Null),
        ]);

        let (_, trace) = client(backend, 3).invoke_traced(&request()).await;

        assert_eq!(trace.delays.len(), 2);
        assert!(trace.delays[0] >= Duration::from_millis(100));
        assert!(trace.delays[1] >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::rate_limited("slow down")),
            Ok(Value::Null),
        ]);
        let token = CancellationToken::new();
        let client = GenerationClient::new(
            backend.clone(),
            RetrySettings::new(3, Duration::from_secs(60)),
        )
        .with_cancellation(token.clone());

        let handle = tokio::spawn(async move { client.invoke(&request()).await });
        // Paused clock: this lets the first attempt fail and enter its 60s backoff.
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Cancelled);
        assert_eq!(backend.calls(), 1);
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Answer {
        value: u32,
    }

    #[tokio::test]
    async fn structured_decode_and_schema_violation() {
        let backend = ScriptedBackend::new(vec![
            Ok(serde_json::json!({"value": 7})),
            Ok(serde_json::json!({"wrong": "shape"})),
        ]);
        let client = client(backend, 1);

        let answer: Answer = client.invoke_structured("d", vec![]).await.unwrap();
        assert_eq!(answer.value, 7);

        let err = client
            .invoke_structured::<Answer>("d", vec![])
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::FatalBackend);
    }

    #[test]
    fn structured_request_carries_schema() {
        let request = GenerationRequest::structured::<Answer>("d", vec![Message::user("hi")]);
        assert_eq!(request.schema_name, "Answer");
        assert!(request.schema["properties"]["value"].is_object());
        assert_eq!(request.messages.len(), 1);
    }
}
