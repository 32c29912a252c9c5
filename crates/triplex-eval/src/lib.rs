//! Triplex Eval - Scoring predicted triples against gold annotations
//!
//! - Triple-level precision, recall and F1 (strict, loose, per coarse type)
//! - Semantic fine-type matching through an embedding client
//! - Entity-level scoring with per-row error analysis

pub mod embedding;
pub mod entities;
pub mod metrics;
pub mod triples;

pub use embedding::{
    cosine_similarity, create_embedding_client, EmbeddingClient, OllamaEmbedding, OpenAiEmbedding,
};
pub use entities::{
    row_mentions, EntityEvaluation, EntityEvaluator, EntityMode, EntityReport, ErrorAnalysis,
    ErrorSample, ErrorStatistics,
};
pub use metrics::{Counts, LabelCounts, Prf};
pub use triples::{ReportConfig, TripleEvalOptions, TripleEvaluator, TripleReport, EMPTY_FINE_TYPE};
