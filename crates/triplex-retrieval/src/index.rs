//! Inverted index builder
//!
//! Scans the corpus once and produces two independent indexes:
//! - coarse type -> positions of rows whose triples mention that coarse type
//!   on the subject or object side
//! - relationship -> positions of rows whose triples use that relationship
//!
//! Both are persisted as JSON with the same build metadata. Labels are kept
//! in a `BTreeMap` and positions are appended in corpus order, so the file
//! content is identical for identical corpora.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use triplex_core::io::{ensure_dir, write_json_overwrite};
use triplex_core::{ExampleRow, Result, TriplexError};

use crate::corpus::Corpus;

pub const COARSE_INDEX_FILENAME: &str = "coarse_index.json";
pub const RELATIONSHIP_INDEX_FILENAME: &str = "relationship_index.json";

// ============================================================================
// Index Kinds
// ============================================================================

/// Which label dimension an index is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Coarse,
    Relationship,
}

impl IndexKind {
    /// File name of the persisted index
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Coarse => COARSE_INDEX_FILENAME,
            Self::Relationship => RELATIONSHIP_INDEX_FILENAME,
        }
    }

    /// Distinct labels one row contributes to this index
    pub fn row_labels<'a>(&self, row: &'a ExampleRow) -> BTreeSet<&'a str> {
        match self {
            Self::Coarse => row
                .output
                .iter()
                .flat_map(|triple| triple.coarse_labels())
                .collect(),
            Self::Relationship => row
                .output
                .iter()
                .filter_map(|triple| triple.relationship_label())
                .collect(),
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coarse => write!(f, "coarse"),
            Self::Relationship => write!(f, "relationship"),
        }
    }
}

// ============================================================================
// Inverted Index
// ============================================================================

/// Label -> ascending corpus positions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvertedIndex {
    postings: BTreeMap<String, Vec<usize>>,
}

impl InvertedIndex {
    /// Build one index over the given rows
    pub fn build(rows: &[ExampleRow], kind: IndexKind) -> Self {
        let mut postings: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for (position, row) in rows.iter().enumerate() {
            // row_labels is a set, and positions only grow, so every
            // posting list stays sorted and duplicate-free
            for label in kind.row_labels(row) {
                postings.entry(label.to_string()).or_default().push(position);
            }
        }

        Self { postings }
    }

    /// Positions for a label; empty when the label is unknown
    pub fn get(&self, label: &str) -> &[usize] {
        self.postings.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, label: &str) -> bool {
        self.postings.contains_key(label)
    }

    /// Number of distinct labels
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// Labels in sorted order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.postings.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.postings
            .iter()
            .map(|(label, positions)| (label.as_str(), positions.as_slice()))
    }

    /// Drop positions at or beyond `num_rows`, returning how many were removed
    pub(crate) fn retain_below(&mut self, num_rows: usize) -> usize {
        let mut dropped = 0;
        for positions in self.postings.values_mut() {
            let before = positions.len();
            positions.retain(|&p| p < num_rows);
            dropped += before - positions.len();
        }
        self.postings.retain(|_, positions| !positions.is_empty());
        dropped
    }
}

// ============================================================================
// Persisted Form
// ============================================================================

/// Build metadata stored alongside each index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Corpus the index was built from
    pub data_path: String,
    /// SHA-256 of the corpus at build time
    pub sha256: String,
    /// Number of corpus rows at build time
    pub num_examples: usize,
    /// Build time, ISO-8601 UTC
    pub created_at: String,
}

impl IndexMeta {
    /// Metadata for a build of `corpus` happening now
    pub fn for_corpus(corpus: &Corpus) -> Self {
        Self {
            data_path: corpus.source().display().to_string(),
            sha256: corpus.sha256().to_string(),
            num_examples: corpus.len(),
            created_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

/// On-disk index document: `{"meta": {...}, "index": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFile {
    pub meta: IndexMeta,
    pub index: InvertedIndex,
}

impl IndexFile {
    /// Read an index file
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TriplexError::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| TriplexError::parse(path.display().to_string(), e))
    }

    /// Write (overwrite) an index file
    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_overwrite(path, self)
    }
}

// ============================================================================
// Build
// ============================================================================

/// Paths of the coarse and relationship index files inside `index_dir`
pub fn index_paths(index_dir: &Path) -> (PathBuf, PathBuf) {
    (
        index_dir.join(IndexKind::Coarse.file_name()),
        index_dir.join(IndexKind::Relationship.file_name()),
    )
}

/// Build both indexes for `corpus` and write them into `index_dir`
///
/// Existing index files are overwritten. Rows whose `output` is missing or
/// not a list contribute nothing and are counted in the build log.
pub fn build_indexes(corpus: &Corpus, index_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    ensure_dir(index_dir)?;

    let meta = IndexMeta::for_corpus(corpus);
    let coarse = InvertedIndex::build(corpus.rows(), IndexKind::Coarse);
    let relationship = InvertedIndex::build(corpus.rows(), IndexKind::Relationship);

    let skipped = malformed_rows(corpus.rows());
    if skipped > 0 {
        tracing::debug!("Skipped {} of {} rows without an output list", skipped, corpus.len());
    }

    let (coarse_path, relationship_path) = index_paths(index_dir);

    IndexFile {
        meta: meta.clone(),
        index: coarse,
    }
    .write(&coarse_path)?;
    IndexFile {
        meta,
        index: relationship,
    }
    .write(&relationship_path)?;

    tracing::info!(
        "Built indexes for {} examples from {}",
        corpus.len(),
        corpus.source().display()
    );

    Ok((coarse_path, relationship_path))
}

fn malformed_rows(rows: &[ExampleRow]) -> usize {
    rows.iter().filter(|r| r.has_malformed_output()).count()
}

// ============================================================================
// Tests
// ============================================================================
