//! Inference client for a local Ollama server.
//!
//! Requests go to `POST {base_url}/api/chat`. The response body is read as
//! text: some deployments decorate the JSON payload with extra characters,
//! so the object is cut out between the first `{` and the last `}` before
//! parsing.

use crate::session::Turn;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Content used when the reply parses but carries no `message.content`.
pub const NO_CONTENT_FALLBACK: &str = "No content found.";

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Turn>,
    pub stream: bool,
}

/// Failure modes of one inference call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    /// Endpoint unreachable, connection dropped or client timeout
    #[error("Request failed: {0}")]
    Transport(String),

    /// Endpoint answered with a non-2xx status
    #[error("HTTP status {0}")]
    Status(u16),

    /// Body did not contain a parseable JSON object
    #[error("{0}")]
    Parse(String),
}

/// Chat-completion backend.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Get the backend name.
    fn name(&self) -> &str;

    /// Send the transcript and return the assistant's reply text.
    async fn chat(&self, request: &ChatRequest) -> Result<String, InferenceError>;
}

/// Ollama `/api/chat` client.
pub struct OllamaClient {
    base_url: String,
    client: Client,
}

impl OllamaClient {
    /// Create a new Ollama client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL for Ollama API (e.g. http://localhost:11434)
    /// * `timeout` - Upper bound for one whole request
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(10).min(timeout))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, InferenceError> {
        let start = Instant::now();
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Transport(format!("request to {url} timed out"))
                } else {
                    InferenceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::debug!(
                status = status.as_u16(),
                body = %error_text,
                "Ollama returned an error status"
            );
            return Err(InferenceError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        tracing::debug!(
            model = %request.model,
            stream = request.stream,
            latency_ms = start.elapsed().as_millis() as u64,
            raw = %body,
            "Raw response"
        );

        extract_content(&body)
    }
}

/// Pull `message.content` out of a (possibly decorated) response body.
///
/// The span between the first `{` and the last `}` is parsed as one JSON
/// object. Streamed replies arrive as newline-delimited objects; when the
/// span does not parse and every line is an object, their contents are
/// concatenated.
pub fn extract_content(body: &str) -> Result<String, InferenceError> {
    match parse_json_span(body) {
        Ok(value) => Ok(content_of(&value)
            .unwrap_or(NO_CONTENT_FALLBACK)
            .to_string()),
        Err(span_err) => join_stream_chunks(body).ok_or(InferenceError::Parse(span_err)),
    }
}

fn parse_json_span(body: &str) -> Result<Value, String> {
    let start = body
        .find('{')
        .ok_or_else(|| "no JSON object in response".to_string())?;
    let end = body
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| "unterminated JSON object in response".to_string())?;

    serde_json::from_str(&body[start..=end]).map_err(|e| e.to_string())
}

fn content_of(value: &Value) -> Option<&str> {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
}

fn join_stream_chunks(body: &str) -> Option<String> {
    let lines: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < 2 {
        return None;
    }

    let mut content = String::new();
    for line in lines {
        let value: Value = serde_json::from_str(line).ok()?;
        if !value.is_object() {
            return None;
        }
        if let Some(part) = content_of(&value) {
            content.push_str(part);
        }
    }
    Some(content)
}
