//! OpenAI-compatible chat completions backend with JSON-schema structured output.

use std::time::Duration;

use async_trait::async_trait;
use coordination::{BackendError, BackendErrorKind, GenerationBackend, GenerationRequest, Role};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::BackendConfig;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiCompatBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()?,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn build_request<'a>(model: &'a str, request: &'a GenerationRequest) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.system_directive.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: &request.system_directive,
        });
    }
    messages.extend(request.messages.iter().map(|m| ChatMessage {
        role: role_name(m.role),
        content: &m.content,
    }));

    ChatRequest {
        model,
        messages,
        response_format: json!({
            "type": "json_schema",
            "json_schema": {
                "name": request.schema_name,
                "schema": request.schema,
            }
        }),
    }
}

/// Map a non-2xx HTTP status onto the backend error vocabulary.
pub fn status_error(status: u16, body: &str) -> BackendError {
    let message = format!("backend returned HTTP {status}: {}", truncate(body, 500));
    let kind = match status {
        429 => BackendErrorKind::RateLimited,
        503 | 529 => BackendErrorKind::Overloaded,
        _ => BackendErrorKind::Other,
    };
    BackendError::new(message).with_status(status).with_kind(kind)
}

/// Parse the first choice's content as JSON. Tolerates a fenced code block.
pub fn parse_content(body: &str) -> Result<Value, BackendError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::new(format!("malformed completion response: {e}")))?;
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| BackendError::new("completion response has no content"))?;

    let trimmed = strip_fence(content.trim());
    serde_json::from_str(trimmed)
        .map_err(|e| BackendError::new(format!("completion content is not JSON: {e}")))
}

fn strip_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl GenerationBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Value, BackendError> {
        let body = build_request(&self.model, request);
        debug!(
            endpoint = %self.endpoint,
            schema = %request.schema_name,
            messages = body.messages.len(),
            "sending completion request"
        );

        let mut builder = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            let err = BackendError::transport(format!("HTTP request failed: {e}"));
            match e.status() {
                Some(status) => err.with_status(status.as_u16()),
                None => err,
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::transport(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &text));
        }
        parse_content(&text)
    }
}
