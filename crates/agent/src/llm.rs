//! Completion service boundary.
//!
//! Every caller treats the model as unreliable: outputs are parsed leniently
//! and each component keeps a deterministic fallback for when this layer
//! returns an error.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use tabula_core::config::{LlmConfig, LlmProvider};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: 1_000 }
    }
}

impl CompletionOptions {
    /// Low-temperature settings for classification prompts.
    pub fn classification(max_tokens: u32) -> Self {
        Self { temperature: 0.2, max_tokens }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("language model is disabled")]
    Disabled,
    #[error("language model request timed out")]
    Timeout,
    #[error("language model rate limited the request")]
    RateLimited,
    #[error("language model returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("language model transport failed: {0}")]
    Transport(String),
    #[error("language model response was unusable: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Disabled | Self::InvalidResponse(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], options: CompletionOptions) -> Result<String, LlmError>;

    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String, LlmError> {
        self.chat(&[ChatMessage::user(prompt)], options).await
    }
}

/// Selected by `llm.provider = "disabled"`; every component then runs on its
/// deterministic fallback.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledLlm;

#[async_trait]
impl LlmClient for DisabledLlm {
    async fn chat(&self, _messages: &[ChatMessage], _options: CompletionOptions) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP adapter
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// `/chat/completions` client for OpenAI and OpenAI-compatible servers
/// (Ollama exposes the same surface under `/v1`).
pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .or_else(|| config.provider.default_base_url().map(str::to_owned))
            .ok_or(LlmError::Disabled)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, messages: &[ChatMessage], options: CompletionOptions) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http { status: status.as_u16(), body: truncate(&body, 500) });
        }

        let parsed: ChatResponse =
            response.json().await.map_err(|error| LlmError::InvalidResponse(error.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices returned".to_owned()))?;

        debug!(event_name = "llm.chat.completed", model = %self.model, chars = content.len(), "chat completion received");
        Ok(content)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 1_000, max_delay_ms: 10_000 }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1_u64 << attempt.min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms))
    }
}

/// Retries retryable failures with exponential backoff.
pub struct RetryingLlm {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingLlm {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmClient for RetryingLlm {
    async fn chat(&self, messages: &[ChatMessage], options: CompletionOptions) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.chat(messages, options).await {
                Ok(content) => return Ok(content),
                Err(error) if error.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        event_name = "llm.chat.retry",
                        attempt,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying chat completion"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Client for the configured provider, wrapped in retries.
pub fn client_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider {
        LlmProvider::Disabled => Ok(Arc::new(DisabledLlm)),
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            let http: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::from_config(config)?);
            Ok(Arc::new(RetryingLlm::new(http, RetryPolicy::with_max_retries(config.max_retries))))
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted client
// ---------------------------------------------------------------------------

/// Replays queued replies in order and records every request; once the
/// queue is drained it answers `Disabled`. Used for offline runs and tests.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new(replies: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self { replies: Mutex::new(replies.into_iter().collect()), requests: Mutex::new(Vec::new()) }
    }

    pub fn push_reply(&self, reply: Result<String, LlmError>) {
        self.replies.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push_back(reply);
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, messages: &[ChatMessage], _options: CompletionOptions) -> Result<String, LlmError> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(messages.to_vec());
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(Err(LlmError::Disabled))
    }
}

/// First JSON object in a model reply. Tolerates code fences and prose
/// around the object.
pub fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value @ Value::Object(_))) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::{
        extract_json, ChatMessage, CompletionOptions, LlmClient, LlmError, RetryPolicy, RetryingLlm, ScriptedLlm,
    };

    #[test]
    fn json_is_found_inside_fences_and_prose() {
        let reply = "Sure! ```json\n{\"category\": \"data_query\", \"confidence\": 0.9}\n``` hope that helps";
        assert_eq!(extract_json(reply), Some(json!({ "category": "data_query", "confidence": 0.9 })));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{ broken"), None);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(!LlmError::Http { status: 400, body: String::new() }.is_retryable());
        assert!(!LlmError::Disabled.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_client_recovers_from_transient_errors() {
        let scripted = Arc::new(ScriptedLlm::new([Err(LlmError::RateLimited), Ok("done".to_owned())]));
        let client = RetryingLlm::new(scripted.clone(), RetryPolicy::default());

        let reply = client.chat(&[ChatMessage::user("hi")], CompletionOptions::default()).await;
        assert_eq!(reply, Ok("done".to_owned()));
        assert_eq!(scripted.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_client_gives_up_after_max_retries() {
        let scripted = Arc::new(ScriptedLlm::new([
            Err(LlmError::Timeout),
            Err(LlmError::Timeout),
            Err(LlmError::Timeout),
            Ok("late".to_owned()),
        ]));
        let client = RetryingLlm::new(scripted.clone(), RetryPolicy::with_max_retries(2));

        let reply = client.complete("hi", CompletionOptions::default()).await;
        assert_eq!(reply, Err(LlmError::Timeout));
        assert_eq!(scripted.requests().len(), 3);
    }
}
