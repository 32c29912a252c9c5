//! Triplex Extractor - LLM triple extraction
//!
//! Turns sentences into (subject, relationship, object) triples:
//! - Chat clients for Ollama and OpenAI-compatible servers
//! - A registry of built-in prompt templates
//! - Few-shot prompt assembly from retrieved examples
//! - Batched extraction with bounded concurrency
//! - Yes/no self-verification of annotated entities

pub mod extractor;
pub mod llm;
pub mod prompt;
pub mod templates;
pub mod verify;

pub use extractor::{parse_output, write_predictions, ExtractorSettings, TripleExtractor};
pub use llm::{create_llm_client, OllamaClient, OpenAiCompatClient};
pub use prompt::{substitute, PromptTemplate, TemplateRegistry};
pub use verify::{parse_yes_no, write_verification, SelfVerifier, VerificationRecord};
