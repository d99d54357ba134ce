//! Model-completion client abstraction.
//!
//! The [`CompletionClient`] trait decouples the loop from the actual
//! completion backend. Tests use scripted clients that return predetermined
//! responses without touching the network. The production implementation
//! talks to an OpenAI-compatible chat-completions endpoint over blocking
//! HTTP with a fixed number of constant-backoff retries.

use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::io::config::ModelConfig;

/// Desired response shape for a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// A JSON object or array; the client enables the endpoint's JSON mode
    /// and parses the returned content.
    Json,
    /// Free text, returned as a JSON string value.
    Text,
}

/// Parameters for one completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub shape: ResponseShape,
    pub timeout: Duration,
}

/// Abstraction over model-completion backends.
pub trait CompletionClient {
    /// Run one completion. Exhausted retries and unparseable content surface
    /// as `Err`; callers absorb those per the recovery rules of their layer.
    fn complete(&self, request: &CompletionRequest) -> Result<Value>;
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct HttpCompletionClient {
    cfg: ModelConfig,
    api_key: String,
    client: Client,
}

impl HttpCompletionClient {
    /// Build a client, reading the API key from the configured environment
    /// variable.
    pub fn new(cfg: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .with_context(|| format!("missing API key: set {}", cfg.api_key_env))?;
        let client = Client::builder()
            .build()
            .context("build http client")?;
        Ok(Self {
            cfg: cfg.clone(),
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        )
    }
}

impl CompletionClient for HttpCompletionClient {
    #[instrument(skip_all, fields(shape = ?request.shape, timeout_secs = request.timeout.as_secs()))]
    fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        let payload = build_payload(&self.cfg.model, request);
        let backoff = Duration::from_millis(self.cfg.retry_backoff_ms);

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..=self.cfg.max_retries {
            if attempt > 0 {
                thread::sleep(backoff);
            }
            let response = self
                .client
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .timeout(request.timeout)
                .json(&payload)
                .send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().context("read response body")?;
                    if status.is_success() {
                        // Format failures are retried like transport ones:
                        // the next attempt may well produce parseable output.
                        match extract_message_content(&body)
                            .and_then(|content| parse_content(request.shape, &content))
                        {
                            Ok(value) => return Ok(value),
                            Err(err) => {
                                warn!(err = %err, attempt, "completion format failure");
                                last_err = Some(err);
                                continue;
                            }
                        }
                    }
                    warn!(status = %status, attempt, "completion request rejected");
                    last_err = Some(anyhow!(
                        "completion endpoint returned {}: {}",
                        status,
                        snippet(&body)
                    ));
                    if !is_retryable_status(status) {
                        break;
                    }
                }
                Err(err) => {
                    warn!(err = %err, attempt, "completion transport failure");
                    last_err = Some(anyhow!(err).context("send completion request"));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("completion request failed without detail")))
    }
}

fn build_payload(model: &str, request: &CompletionRequest) -> Value {
    let mut payload = json!({
        "model": model,
        "messages": [{"role": "user", "content": request.prompt}],
        "temperature": 0.0,
    });
    if request.shape == ResponseShape::Json {
        payload["response_format"] = json!({"type": "json_object"});
    }
    payload
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Pull `choices[0].message.content` out of a chat-completion envelope.
fn extract_message_content(body: &str) -> Result<String> {
    let envelope: Value = serde_json::from_str(body).context("parse completion envelope")?;
    envelope["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("completion response carried no message content"))
}

/// Interpret returned content according to the requested shape.
fn parse_content(shape: ResponseShape, content: &str) -> Result<Value> {
    match shape {
        ResponseShape::Text => Ok(Value::String(content.to_string())),
        ResponseShape::Json => {
            if let Ok(value) = serde_json::from_str::<Value>(content.trim()) {
                return Ok(value);
            }
            if let Some(fenced) = extract_fenced_json(content) {
                let value: Value =
                    serde_json::from_str(fenced).context("parse fenced json content")?;
                debug!("recovered json from fenced block");
                return Ok(value);
            }
            Err(anyhow!("completion content is not valid json: {}", snippet(content)))
        }
    }
}

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fence pattern should be valid")
});

/// Extract the body of the first fenced code block, if any.
fn extract_fenced_json(content: &str) -> Option<&str> {
    FENCE_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn snippet(text: &str) -> String {
    const LIMIT: usize = 200;
    let trimmed = text.trim();
    if trimmed.len() <= LIMIT {
        return trimmed.to_string();
    }
    let cut = trimmed
        .char_indices()
        .take_while(|(i, _)| *i < LIMIT)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    format!("{}...", &trimmed[..cut])
}
