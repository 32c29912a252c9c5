//! Triplex Retrieval - Few-shot example retrieval
//!
//! Selects worked examples for in-context prompting from an annotated corpus:
//! - Corpus store with a content digest for staleness checks
//! - Coarse-type and relationship inverted indexes persisted as JSON
//! - Seeded sampling from an index's candidate pool
//! - Priority-cascade shot selection with a static fallback pool
//!
//! Author: hephaex@gmail.com

pub mod corpus;
pub mod fallback;
pub mod index;
pub mod retriever;
pub mod selector;

pub use corpus::Corpus;
pub use fallback::fallback_pool;
pub use index::{
    build_indexes, index_paths, IndexFile, IndexKind, IndexMeta, InvertedIndex,
    COARSE_INDEX_FILENAME, RELATIONSHIP_INDEX_FILENAME,
};
pub use retriever::{random_pick, FewShotRetrieval, Shot};
pub use selector::{SelectedShot, ShotSelector, ShotSource, DEFAULT_PER_QUERY_K, DEFAULT_SEED};
