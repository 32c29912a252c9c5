//! Triplex Core - Domain models, errors, and shared plumbing
//!
//! This crate defines the pieces shared by every Triplex crate:
//! - Corpus data model (example rows, triples, shot pairs)
//! - Common error types
//! - Configuration management
//! - Corpus and JSON file I/O
//! - The chat-style LLM client trait

pub mod config;
pub mod io;
pub mod model;

pub use config::{
    AppConfig, ConfigError, EvaluationConfig, ExtractionConfig, LlmConfig, LlmProvider,
    LoggingConfig, PathsConfig, RetrievalConfig,
};
pub use model::{ExampleRow, Mention, ShotInput, ShotPair, Triple};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for Triplex operations
#[derive(Error, Debug)]
pub enum TriplexError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Index files not found, build them first with `triplex build-index`:\n  {}\n  {}",
        .coarse.display(),
        .relationship.display()
    )]
    IndexNotFound {
        coarse: PathBuf,
        relationship: PathBuf,
    },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {context}: {message}")]
    Parse { context: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TriplexError {
    /// Wrap an IO error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Build a parse error
    pub fn parse(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

impl From<ConfigError> for TriplexError {
    fn from(e: ConfigError) -> Self {
        Self::ConfigError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TriplexError>;

// ============================================================================
// Chat Messages
// ============================================================================

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A role-tagged chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for chat-completion LLM clients
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a conversation and return the assistant's text
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Model name for logging
    fn model(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================
