//! Oracle client: the single point of entry for all text-understanding calls.
//!
//! ARCHITECTURAL RULE: no stage talks to the Anthropic API directly. Stages depend on the
//! `TextOracle` trait and receive an `OracleReply` (raw text + best-effort parsed JSON).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub mod embedding;
pub mod prompts;
pub mod repair;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Default model when `ORACLE_MODEL` is not set.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;
const MAX_RETRIES: u32 = 3;
/// Raw output kept for diagnostics is cut to this many characters.
pub const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Oracle returned empty content")]
    EmptyContent,

    #[error("Oracle call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Oracle unavailable: {0}")]
    Unavailable(String),
}

/// The text-understanding capability every pipeline stage depends on.
#[async_trait]
pub trait TextOracle: Send + Sync {
    /// Sends a role-scoped instruction plus user payload and returns the raw reply text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, OracleError>;
}

/// Raw oracle output plus the outcome of the permissive JSON pass.
#[derive(Debug, Clone)]
pub struct OracleReply {
    pub raw: String,
    pub parsed: Result<Value, String>,
}

impl OracleReply {
    pub fn from_raw(raw: String) -> Self {
        let parsed = repair::parse_lenient(&raw);
        Self { raw, parsed }
    }

    /// Raw text truncated for logs and diagnostics.
    pub fn preview(&self) -> String {
        preview(&self.raw)
    }
}

/// Calls the oracle and runs the repair pass over its reply.
pub async fn ask(
    oracle: &dyn TextOracle,
    system: &str,
    prompt: &str,
) -> Result<OracleReply, OracleError> {
    let raw = oracle.complete(system, prompt).await?;
    if raw.trim().is_empty() {
        return Err(OracleError::EmptyContent);
    }
    Ok(OracleReply::from_raw(raw))
}

pub fn preview(raw: &str) -> String {
    let mut out: String = raw.chars().take(PREVIEW_CHARS).collect();
    if raw.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Anthropic Messages API client
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Production oracle backed by the Anthropic Messages API, with retry on 429/5xx.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String) -> Result<Self, OracleError> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(120)).build()?,
            api_key,
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Makes a raw call, returning the full response object.
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    pub async fn call(&self, prompt: &str, system: &str) -> Result<LlmResponse, OracleError> {
        let request_body = AnthropicRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error: Option<OracleError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // 1s, 2s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Oracle call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(OracleError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Oracle API returned {}: {}", status, preview(&body));
                last_error = Some(OracleError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<AnthropicError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(OracleError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let llm_response: LlmResponse = response.json().await?;

            debug!(
                "Oracle call succeeded: input_tokens={}, output_tokens={}",
                llm_response.usage.input_tokens, llm_response.usage.output_tokens
            );

            return Ok(llm_response);
        }

        Err(last_error.unwrap_or(OracleError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

#[async_trait]
impl TextOracle for LlmClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, OracleError> {
        let response = self.call(prompt, system).await?;
        response
            .text()
            .map(str::to_string)
            .ok_or(OracleError::EmptyContent)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Throttling
// ────────────────────────────────────────────────────────────────────────────

/// Bounds concurrent calls to an oracle and applies a per-call timeout.
///
/// Shared across every deal of a batch so large batches cannot flood the provider.
pub struct Throttled<O> {
    inner: O,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl<O> Throttled<O> {
    pub fn new(inner: O, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }
}

#[async_trait]
impl<O: TextOracle> TextOracle for Throttled<O> {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, OracleError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| OracleError::Unavailable("throttle closed".to_string()))?;

        tokio::time::timeout(self.timeout, self.inner.complete(system, prompt))
            .await
            .map_err(|_| OracleError::Timeout {
                secs: self.timeout.as_secs(),
            })?
    }
}
