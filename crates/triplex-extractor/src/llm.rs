//! LLM Client implementations
//!
//! Chat clients for Ollama and OpenAI-compatible servers (OpenAI, vLLM,
//! LM Studio). Both retry rate-limit, server-side and transport failures
//! with capped exponential backoff.
//!
//! Author: hephaex@gmail.com

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use triplex_core::{ChatMessage, LlmClient, LlmConfig, LlmProvider, Result, TriplexError};

/// Longest wait between two attempts
const MAX_BACKOFF_SECS: u64 = 10;

// ============================================================================
// Retry
// ============================================================================

/// Statuses worth another attempt
fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Delay after the given zero-based attempt: 1s, 2s, 4s, ... capped at 10s
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64
        .checked_shl(attempt)
        .unwrap_or(MAX_BACKOFF_SECS)
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

/// Send a request, retrying on transient failures, and decode the JSON body
async fn send_with_retry(
    retry: u32,
    endpoint: &str,
    build: impl Fn() -> RequestBuilder,
) -> Result<Value> {
    let attempts = retry.max(1);
    let mut last_error = String::new();

    for attempt in 0..attempts {
        match build().send().await {
            Ok(response) if response.status().is_success() => {
                return response
                    .json::<Value>()
                    .await
                    .map_err(|e| TriplexError::LlmError(format!("Failed to parse response: {e}")));
            }
            Ok(response) if is_retryable(response.status()) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{endpoint} returned {status}: {body}");
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(TriplexError::LlmError(format!(
                    "{endpoint} returned {status}: {body}"
                )));
            }
            Err(e) => {
                last_error = format!("Request to {endpoint} failed: {e}");
            }
        }

        if attempt + 1 < attempts {
            let delay = backoff_delay(attempt);
            tracing::warn!(
                "LLM request failed (attempt {}/{}), retrying in {:?}: {}",
                attempt + 1,
                attempts,
                delay,
                last_error
            );
            tokio::time::sleep(delay).await;
        }
    }

    Err(TriplexError::LlmError(format!(
        "Giving up after {attempts} attempts: {last_error}"
    )))
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| TriplexError::LlmError(format!("Failed to build HTTP client: {e}")))
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: String,
    content: &'a str,
}

fn wire_messages(messages: &[ChatMessage]) -> Vec<Message<'_>> {
    messages
        .iter()
        .map(|m| Message {
            role: m.role.to_string(),
            content: &m.content,
        })
        .collect()
}

fn missing_content(body: &Value) -> TriplexError {
    let text: String = body.to_string().chars().take(500).collect();
    TriplexError::LlmError(format!("Response carries no text content: {text}"))
}

// ============================================================================
// Ollama Client
// ============================================================================

/// Ollama `/api/chat` client
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    json_response: bool,
    retry: u32,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

impl OllamaClient {
    /// Create a new Ollama client with default generation settings
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let defaults = LlmConfig::default();
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            json_response: defaults.json_response,
            retry: defaults.retry,
        }
    }

    /// Create from config, resolving model aliases
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.resolved_base_url(),
            model: resolve_model_alias(&config.alias_map, &config.model),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            json_response: config.json_response,
            retry: config.retry,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = OllamaRequest {
            model: &self.model,
            messages: wire_messages(messages),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
            format: self.json_response.then_some("json"),
        };

        let endpoint = self.endpoint();
        let body = send_with_retry(self.retry, &endpoint, || {
            self.client.post(&endpoint).json(&request)
        })
        .await?;

        body.pointer("/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| missing_content(&body))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Map a friendly model name to its Ollama tag; unknown names pass through
pub fn resolve_model_alias(alias_map: &HashMap<String, String>, model: &str) -> String {
    alias_map
        .get(model)
        .cloned()
        .unwrap_or_else(|| model.to_string())
}

// ============================================================================
// OpenAI-compatible Client
// ============================================================================

/// `/v1/chat/completions` client for OpenAI and compatible servers
pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    json_response: bool,
    retry: u32,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiCompatClient {
    /// Create a new client with default generation settings
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let defaults = LlmConfig::default();
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            json_response: defaults.json_response,
            retry: defaults.retry,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.resolved_base_url(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            json_response: config.json_response,
            retry: config.retry,
        })
    }

    /// Set the bearer token
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn endpoint(&self) -> String {
        if self.base_url.ends_with("/v1") {
            format!("{}/chat/completions", self.base_url)
        } else {
            format!("{}/v1/chat/completions", self.base_url)
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = OpenAiRequest {
            model: &self.model,
            messages: wire_messages(messages),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: self
                .json_response
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        let endpoint = self.endpoint();
        let body = send_with_retry(self.retry, &endpoint, || {
            let builder = self.client.post(&endpoint).json(&request);
            match &self.api_key {
                Some(key) => builder.bearer_auth(key),
                None => builder,
            }
        })
        .await?;

        let parsed: OpenAiResponse = serde_json::from_value(body.clone())
            .map_err(|e| TriplexError::LlmError(format!("Failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| missing_content(&body))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an LLM client from config
pub fn create_llm_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    tracing::info!(
        "Using {:?} model {} at {}",
        config.provider,
        config.model,
        config.resolved_base_url()
    );

    match config.provider {
        LlmProvider::Ollama => Ok(Box::new(OllamaClient::from_config(config)?)),
        LlmProvider::OpenAi => Ok(Box::new(OpenAiCompatClient::from_config(config)?)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(4), Duration::from_secs(10));
        assert_eq!(backoff_delay(80), Duration::from_secs(10));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::NOT_IMPLEMENTED));
    }

    #[test]
    fn test_model_alias() {
        let config = LlmConfig::default();
        assert_eq!(
            resolve_model_alias(&config.alias_map, "qwen2.5-7B-Instruct"),
            "qwen2.5:7b-instruct"
        );
        assert_eq!(resolve_model_alias(&config.alias_map, "mistral"), "mistral");
    }

    #[test]
    fn test_ollama_request_shape() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let request = OllamaRequest {
            model: "m",
            messages: wire_messages(&messages),
            stream: false,
            options: OllamaOptions {
                temperature: 0.0,
                num_predict: 64,
            },
            format: Some("json"),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
        assert_eq!(value["options"]["num_predict"], 64);
        assert_eq!(value["format"], "json");
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn test_openai_endpoint() {
        let client = OpenAiCompatClient::new("http://gpu:8000/", "m");
        assert_eq!(client.endpoint(), "http://gpu:8000/v1/chat/completions");

        let client = OpenAiCompatClient::new("https://api.openai.com/v1", "gpt-4o-mini");
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_openai_request_omits_format_when_disabled() {
        let request = OpenAiRequest {
            model: "m",
            messages: Vec::new(),
            temperature: 0.2,
            max_tokens: 16,
            response_format: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("response_format").is_none());
    }

    #[test]
    fn test_factory_picks_provider() {
        let mut config = LlmConfig::default();
        let client = create_llm_client(&config).unwrap();
        assert_eq!(client.model(), "qwen2.5:7b-instruct");

        config.provider = LlmProvider::OpenAi;
        config.model = "gpt-4o-mini".to_string();
        let client = create_llm_client(&config).unwrap();
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_unreachable_server_gives_llm_error() {
        let mut config = LlmConfig::default();
        config.base_url = Some("http://127.0.0.1:9".to_string());
        config.retry = 1;
        config.timeout_secs = 2;

        let client = OllamaClient::from_config(&config).unwrap();
        let err = client.chat(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, TriplexError::LlmError(_)));
    }
}
