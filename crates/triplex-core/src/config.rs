//! Triplex Configuration Management
//!
//! Handles configuration from a TOML file and environment variables,
//! with defaults suitable for a local Ollama setup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Data and output locations
    pub paths: PathsConfig,

    /// Few-shot retrieval settings
    pub retrieval: RetrievalConfig,

    /// Extraction pipeline settings
    pub extraction: ExtractionConfig,

    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Evaluation settings
    pub evaluation: EvaluationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Apply environment variables on top of this configuration
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        // Paths
        if let Ok(path) = std::env::var("TRIPLEX_DATA_PATH") {
            self.paths.data_path = path.into();
        }
        if let Ok(dir) = std::env::var("TRIPLEX_INDEX_DIR") {
            self.paths.index_dir = dir.into();
        }
        if let Ok(dir) = std::env::var("TRIPLEX_OUTPUT_DIR") {
            self.paths.output_dir = dir.into();
        }

        // Retrieval
        if let Ok(seed) = std::env::var("TRIPLEX_SEED") {
            self.retrieval.seed = seed.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TRIPLEX_SEED".to_string(),
                value: seed,
            })?;
        }

        // LLM
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.evaluation.embedding_model = model;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(self)
    }
}

/// Data and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Annotated corpus the indexes are built from
    pub data_path: PathBuf,

    /// Directory holding `coarse_index.json` and `relationship_index.json`
    pub index_dir: PathBuf,

    /// Directory for predictions and reports
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data/train.json"),
            index_dir: PathBuf::from("outputs/index"),
            output_dir: PathBuf::from("outputs"),
        }
    }
}

/// Few-shot retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates drawn per schema entry / coarse type
    pub per_query_k: usize,

    /// Number of shots placed in each prompt
    pub num_shots: usize,

    /// Seed for candidate sampling
    pub seed: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            per_query_k: 3,
            num_shots: 5,
            seed: 42,
        }
    }
}

/// Extraction pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Prompt template name
    pub template: String,

    /// Upper bound on few-shot pairs rendered into one prompt
    pub max_few_shot: usize,

    /// LLM requests in flight at once
    pub concurrency: usize,

    /// Only process the first N rows of the input
    pub max_examples: Option<usize>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            template: "openie_dynamic".to_string(),
            max_few_shot: 5,
            concurrency: 8,
            max_examples: None,
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider to use
    pub provider: LlmProvider,

    /// Server base URL; falls back to the provider default
    pub base_url: Option<String>,

    /// Model name to use
    pub model: String,

    /// API key for OpenAI-compatible servers
    pub api_key: Option<String>,

    /// Temperature for generation
    pub temperature: f32,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Ask the server to constrain output to JSON
    pub json_response: bool,

    /// Attempts per request
    pub retry: u32,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Friendly model names mapped to Ollama tags
    pub alias_map: HashMap<String, String>,
}

impl LlmConfig {
    /// Base URL for the configured provider
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        let alias_map = [
            ("Llama3-8B", "llama3:8b"),
            ("Llama3-8B-Instruct", "llama3:8b-instruct"),
            ("LLama3.1-8B", "llama3.1:8b"),
            ("LLama3.1-8B-Instruct", "llama3.1:8b-instruct"),
            ("qwen2.5-7B-Instruct", "qwen2.5:7b-instruct"),
            ("qwen3-4B-instruct", "qwen3:4b-instruct"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            provider: LlmProvider::Ollama,
            base_url: None,
            model: "qwen2.5:7b-instruct".to_string(),
            api_key: None,
            temperature: 0.0,
            max_tokens: 1024,
            json_response: true,
            retry: 3,
            timeout_secs: 60,
            alias_map,
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    /// OpenAI or any compatible server (vLLM, LM Studio, ...)
    #[serde(alias = "vllm", alias = "openai-compatible")]
    OpenAi,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Ollama => "http://127.0.0.1:11434",
            Self::OpenAi => "http://127.0.0.1:8000",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "vllm" | "openai-compatible" => Ok(Self::OpenAi),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Match coarse types as well as names and relationship
    pub strict: bool,

    /// Break strict results down by coarse type
    pub by_type: bool,

    /// Compare fine types by embedding similarity in strict mode
    pub strict_semantic: bool,

    /// Cosine threshold for a semantic fine-type match
    pub threshold: f32,

    /// Provider serving the embedding model
    pub embedding_provider: LlmProvider,

    /// Embedding server base URL; falls back to the provider default
    pub embedding_base_url: Option<String>,

    /// Embedding model name
    pub embedding_model: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            strict: true,
            by_type: false,
            strict_semantic: false,
            threshold: 0.80,
            embedding_provider: LlmProvider::Ollama,
            embedding_base_url: None,
            embedding_model: "all-minilm".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.retrieval.per_query_k, 3);
        assert_eq!(config.retrieval.num_shots, 5);
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.llm.resolved_base_url(), "http://127.0.0.1:11434");
    }

    #[test]
    fn test_llm_provider_parse() {
        assert_eq!("ollama".parse::<LlmProvider>().unwrap(), LlmProvider::Ollama);
        assert_eq!("vLLM".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert!("invalid".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [retrieval]
            num_shots = 3

            [llm]
            provider = "vllm"
            base_url = "http://gpu-box:8000/"
            "#,
        )
        .unwrap();

        assert_eq!(config.retrieval.num_shots, 3);
        assert_eq!(config.retrieval.per_query_k, 3);
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.resolved_base_url(), "http://gpu-box:8000");
    }

    #[test]
    fn test_missing_config_file() {
        let err = AppConfig::from_file("/no/such/triplex.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
