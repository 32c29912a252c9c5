//! Embedding clients for semantic fine-type matching
//!
//! Supports Ollama and OpenAI-compatible embedding APIs. The evaluator is
//! handed a client explicitly, so one client can be created at startup and
//! shared by every evaluation run.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use triplex_core::{EvaluationConfig, LlmProvider, Result, TriplexError};

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embeddings for several texts, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TriplexError::LlmError("No embedding returned".to_string()))
    }

    /// Model name for reports
    fn model(&self) -> &str;
}

/// Cosine similarity; 0 when either vector has zero length or sizes differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn check_count(expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(TriplexError::LlmError(format!(
            "Asked for {expected} embeddings, got {got}"
        )))
    }
}

// ============================================================================
// OpenAI Embedding Client
// ============================================================================

/// `/v1/embeddings` client for OpenAI and compatible servers
pub struct OpenAiEmbedding {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedding {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn endpoint(&self) -> String {
        if self.base_url.ends_with("/v1") {
            format!("{}/embeddings", self.base_url)
        } else {
            format!("{}/v1/embeddings", self.base_url)
        }
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OpenAiEmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TriplexError::LlmError(format!("Embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TriplexError::LlmError(format!(
                "Embedding error: {error_text}"
            )));
        }

        let result: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            TriplexError::LlmError(format!("Failed to parse embedding response: {e}"))
        })?;

        let mut data = result.data;
        data.sort_by_key(|e| e.index);
        check_count(texts.len(), data.len())?;

        Ok(data.into_iter().map(|e| e.embedding).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Ollama Embedding Client
// ============================================================================

/// Ollama `/api/embed` client
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedding {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OllamaEmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| TriplexError::LlmError(format!("Ollama embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TriplexError::LlmError(format!(
                "Ollama embedding error: {error_text}"
            )));
        }

        let result: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            TriplexError::LlmError(format!("Failed to parse Ollama embedding response: {e}"))
        })?;

        check_count(texts.len(), result.embeddings.len())?;
        Ok(result.embeddings)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an embedding client from the evaluation config
pub fn create_embedding_client(
    config: &EvaluationConfig,
    api_key: Option<&str>,
) -> Box<dyn EmbeddingClient> {
    let base_url = config
        .embedding_base_url
        .clone()
        .unwrap_or_else(|| config.embedding_provider.default_base_url().to_string());

    match config.embedding_provider {
        LlmProvider::Ollama => Box::new(OllamaEmbedding::new(base_url, &config.embedding_model)),
        LlmProvider::OpenAi => {
            let client = OpenAiEmbedding::new(base_url, &config.embedding_model);
            match api_key {
                Some(key) => Box::new(client.with_api_key(key)),
                None => Box::new(client),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_openai_endpoint() {
        assert_eq!(
            OpenAiEmbedding::new("http://localhost:8000/", "m").endpoint(),
            "http://localhost:8000/v1/embeddings"
        );
        assert_eq!(
            OpenAiEmbedding::new("https://api.openai.com/v1", "m").endpoint(),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn test_factory_uses_configured_model() {
        let config = EvaluationConfig::default();
        let client = create_embedding_client(&config, None);
        assert_eq!(client.model(), "all-minilm");
    }

    #[test]
    fn test_ollama_request_shape() {
        let input = vec!["city".to_string(), "<EMPTY>".to_string()];
        let request = OllamaEmbeddingRequest {
            model: "all-minilm",
            input: &input,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["input"][1], "<EMPTY>");
    }

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        let client = OllamaEmbedding::new("http://127.0.0.1:9", "m");
        assert!(client.embed_batch(&[]).await.unwrap().is_empty());
    }
}
