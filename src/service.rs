//! Chat-completion service used for category discovery.
//!
//! The engine only needs "send a system + user message, get text back", so the
//! seam is a small synchronous trait. `OpenAiService` talks to any
//! OpenAI-compatible `/chat/completions` endpoint.

use crate::config::EngineConfig;
use crate::error::{CoderError, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// One fully rendered request. Everything that can change the answer is in
/// here, which is what makes it usable as a cache key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

pub trait CompletionService: Send + Sync {
    /// Return the raw message text of the completion
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

impl<T: CompletionService + ?Sized> CompletionService for Box<T> {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (**self).complete(request)
    }
}

impl<T: CompletionService + ?Sized> CompletionService for &T {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (**self).complete(request)
    }
}

// ============================================================================
// OpenAI-compatible client
// ============================================================================

pub struct OpenAiService {
    client: HttpClient,
    base_url: String,
    api_key: String,
    api_key_env: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiService {
    /// Build a client from config; fails when the API key is not set
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            api_key_env: config.api_key_env.clone(),
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| CoderError::MissingCredentials(self.api_key_env.clone()))?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }
}

impl CompletionService for OpenAiService {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &request.model,
            temperature: request.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        debug!("POST {} (model {})", url, request.model);
        let response = self.client.post(url).headers(self.headers()?).json(&body).send()?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &text));
        }

        let reply: ChatResponse = response.json()?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(CoderError::EmptyCompletion)
    }
}

/// Map a failed HTTP exchange onto the error taxonomy.
///
/// Quota exhaustion is reported by OpenAI as a 429 with an
/// `insufficient_quota` code, so the body is checked before the status.
pub fn classify_failure(status: u16, body: &str) -> CoderError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "unknown error".to_string()
            } else {
                trimmed.chars().take(300).collect()
            }
        });

    let is_quota = error
        .map(|e| {
            ["code", "type"]
                .iter()
                .filter_map(|field| e.get(*field).and_then(Value::as_str))
                .any(|v| v == "insufficient_quota")
        })
        .unwrap_or(false);

    match status {
        401 | 403 => CoderError::Authentication { status, message },
        _ if is_quota => CoderError::QuotaExceeded(message),
        429 => CoderError::RateLimited(message),
        _ => CoderError::Service { status, message },
    }
}
