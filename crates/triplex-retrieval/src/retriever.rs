//! Index loader and few-shot retriever
//!
//! `FewShotRetrieval` ties a corpus file to an index directory. Building and
//! loading are separate phases: loading never builds, and a missing index
//! file is an error naming both expected paths.
//!
//! Retrieval draws from a generator seeded per call, so two calls with the
//! same seed, label and `k` return the same positions in the same order no
//! matter what ran in between.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use triplex_core::{ExampleRow, PathsConfig, Result, ShotPair, TriplexError};

use crate::corpus::Corpus;
use crate::index::{self, IndexFile, IndexKind, IndexMeta, InvertedIndex};

// ============================================================================
// Retrieved Shots
// ============================================================================

/// A retrieved corpus row together with its position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shot<'a> {
    pub position: usize,
    pub row: &'a ExampleRow,
}

impl Shot<'_> {
    pub fn to_pair(&self) -> ShotPair {
        self.row.to_shot_pair()
    }
}

// ============================================================================
// Loaded State
// ============================================================================

#[derive(Debug)]
struct LoadedIndexes {
    corpus: Corpus,
    coarse: InvertedIndex,
    relationship: InvertedIndex,
    meta: IndexMeta,
}

impl LoadedIndexes {
    fn read(data_path: &Path, coarse_path: &Path, relationship_path: &Path) -> Result<Self> {
        if !coarse_path.is_file() || !relationship_path.is_file() {
            return Err(TriplexError::IndexNotFound {
                coarse: coarse_path.to_path_buf(),
                relationship: relationship_path.to_path_buf(),
            });
        }

        let coarse_file = IndexFile::read(coarse_path)?;
        let relationship_file = IndexFile::read(relationship_path)?;
        let corpus = Corpus::load(data_path)?;

        let meta = coarse_file.meta;
        if meta.sha256 != corpus.sha256() || meta.num_examples != corpus.len() {
            tracing::warn!(
                "Index at {} was built from a different corpus (indexed {} rows, found {}); rebuild with `triplex build-index`",
                coarse_path.display(),
                meta.num_examples,
                corpus.len()
            );
        }

        let mut coarse = coarse_file.index;
        let mut relationship = relationship_file.index;
        let dropped = coarse.retain_below(corpus.len()) + relationship.retain_below(corpus.len());
        if dropped > 0 {
            tracing::warn!("Dropped {} index positions outside the corpus", dropped);
        }

        tracing::info!(
            "Loaded indexes: {} coarse types, {} relationships, {} examples",
            coarse.len(),
            relationship.len(),
            corpus.len()
        );

        Ok(Self {
            corpus,
            coarse,
            relationship,
            meta,
        })
    }

    fn index(&self, kind: IndexKind) -> &InvertedIndex {
        match kind {
            IndexKind::Coarse => &self.coarse,
            IndexKind::Relationship => &self.relationship,
        }
    }
}

// ============================================================================
// Few-Shot Retrieval
// ============================================================================

/// Inverted-index backed few-shot retrieval over one corpus
#[derive(Debug)]
pub struct FewShotRetrieval {
    data_path: PathBuf,
    index_dir: PathBuf,
    loaded: OnceCell<LoadedIndexes>,
}

impl FewShotRetrieval {
    /// Create a retrieval session; nothing is read until first use
    pub fn new(data_path: impl Into<PathBuf>, index_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            index_dir: index_dir.into(),
            loaded: OnceCell::new(),
        }
    }

    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(&paths.data_path, &paths.index_dir)
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn coarse_index_path(&self) -> PathBuf {
        self.index_dir.join(IndexKind::Coarse.file_name())
    }

    pub fn relationship_index_path(&self) -> PathBuf {
        self.index_dir.join(IndexKind::Relationship.file_name())
    }

    /// Build both indexes from the corpus at `data_path`
    ///
    /// Anything loaded earlier in this session is discarded.
    pub fn build_indexes(&mut self) -> Result<(PathBuf, PathBuf)> {
        let corpus = Corpus::load(&self.data_path)?;
        let paths = index::build_indexes(&corpus, &self.index_dir)?;
        self.loaded = OnceCell::new();
        Ok(paths)
    }

    /// Read the indexes and corpus, replacing any earlier load
    pub fn load_indexes(&mut self) -> Result<()> {
        let loaded = self.read_indexes()?;
        self.loaded = OnceCell::from(loaded);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// Loaded corpus
    pub fn corpus(&self) -> Result<&Corpus> {
        Ok(&self.ensure_loaded()?.corpus)
    }

    /// Metadata recorded when the indexes were built
    pub fn meta(&self) -> Result<&IndexMeta> {
        Ok(&self.ensure_loaded()?.meta)
    }

    /// Index of the given kind
    pub fn index(&self, kind: IndexKind) -> Result<&InvertedIndex> {
        Ok(self.ensure_loaded()?.index(kind))
    }

    /// Up to `k` rows whose triples mention `coarse_type`
    pub fn retrieve_by_coarse_type(
        &self,
        coarse_type: &str,
        k: usize,
        seed: u64,
    ) -> Result<Vec<Shot<'_>>> {
        self.retrieve(IndexKind::Coarse, coarse_type, k, seed)
    }

    /// Up to `k` rows whose triples use the relationship `schema`
    pub fn retrieve_by_schema(&self, schema: &str, k: usize, seed: u64) -> Result<Vec<Shot<'_>>> {
        self.retrieve(IndexKind::Relationship, schema, k, seed)
    }

    /// Sample `min(k, pool)` rows for `label` from one index
    pub fn retrieve(
        &self,
        kind: IndexKind,
        label: &str,
        k: usize,
        seed: u64,
    ) -> Result<Vec<Shot<'_>>> {
        let loaded = self.ensure_loaded()?;
        let pool = loaded.index(kind).get(label);

        let shots = random_pick(pool, k, seed)
            .into_iter()
            .filter_map(|position| {
                loaded
                    .corpus
                    .get(position)
                    .map(|row| Shot { position, row })
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            "Retrieved {} of {} {} candidates for {:?}",
            shots.len(),
            pool.len(),
            kind,
            label
        );

        Ok(shots)
    }

    fn ensure_loaded(&self) -> Result<&LoadedIndexes> {
        self.loaded.get_or_try_init(|| self.read_indexes())
    }

    fn read_indexes(&self) -> Result<LoadedIndexes> {
        LoadedIndexes::read(
            &self.data_path,
            &self.coarse_index_path(),
            &self.relationship_index_path(),
        )
    }
}

/// Pick `k` positions from `pool` with a generator seeded from `seed`
///
/// A pool no larger than `k` comes back whole and shuffled; otherwise exactly
/// `k` distinct positions are sampled uniformly.
pub fn random_pick(pool: &[usize], k: usize, seed: u64) -> Vec<usize> {
    if k == 0 || pool.is_empty() {
        return Vec::new();
    }

    let mut rng = StdRng::seed_from_u64(seed);

    if pool.len() <= k {
        let mut picked = pool.to_vec();
        picked.shuffle(&mut rng);
        return picked;
    }

    rand::seq::index::sample(&mut rng, pool.len(), k)
        .into_iter()
        .map(|i| pool[i])
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use tempfile::TempDir;
    use triplex_core::io::write_json_overwrite;
    use triplex_core::{Mention, Triple};

    fn triple(subject_coarse: &str, relationship: &str) -> Triple {
        Triple::new(
            Mention::new("s", subject_coarse, "f"),
            relationship,
            Mention::new("o", "thing", "f"),
        )
    }

    /// Three rows: X with a `loc` subject, Y with untyped mentions, no output
    fn scenario_rows() -> Vec<Value> {
        vec![
            json!({
                "sentence": "row zero",
                "output": [{"subject": ["s", "loc", "f"], "relationship": "X", "object": ["o"]}]
            }),
            json!({
                "sentence": "row one",
                "output": [{"subject": ["a"], "relationship": "Y", "object": ["b"]}]
            }),
            json!({"sentence": "row two"}),
        ]
    }

    fn write_corpus<T: Serialize + ?Sized>(dir: &TempDir, rows: &T) -> PathBuf {
        let path = dir.path().join("train.json");
        write_json_overwrite(&path, rows).unwrap();
        path
    }

    fn built<T: Serialize + ?Sized>(rows: &T) -> (TempDir, FewShotRetrieval) {
        let dir = tempfile::tempdir().unwrap();
        let data = write_corpus(&dir, rows);
        let mut retrieval = FewShotRetrieval::new(data, dir.path().join("index"));
        retrieval.build_indexes().unwrap();
        (dir, retrieval)
    }

    #[test]
    fn test_random_pick_small_pool_returns_all() {
        let picked = random_pick(&[4, 9], 5, 1);
        let set: HashSet<_> = picked.iter().copied().collect();
        assert_eq!(picked.len(), 2);
        assert_eq!(set, HashSet::from([4, 9]));
    }

    #[test]
    fn test_random_pick_samples_exactly_k() {
        let pool: Vec<usize> = (0..50).collect();
        let picked = random_pick(&pool, 7, 42);
        let set: HashSet<_> = picked.iter().copied().collect();
        assert_eq!(picked.len(), 7);
        assert_eq!(set.len(), 7);
        assert!(picked.iter().all(|p| *p < 50));
    }

    #[test]
    fn test_random_pick_is_deterministic() {
        let pool: Vec<usize> = (0..50).collect();
        assert_eq!(random_pick(&pool, 3, 42), random_pick(&pool, 3, 42));
        assert_eq!(random_pick(&pool, 60, 7), random_pick(&pool, 60, 7));
    }

    #[test]
    fn test_random_pick_zero_k() {
        assert!(random_pick(&[1, 2, 3], 0, 1).is_empty());
        assert!(random_pick(&[], 3, 1).is_empty());
    }

    #[test]
    fn test_scenario_indexes() {
        let (_dir, retrieval) = built(&scenario_rows());

        let rel = retrieval.index(IndexKind::Relationship).unwrap();
        assert_eq!(
            rel.iter().collect::<Vec<_>>(),
            vec![("X", &[0usize][..]), ("Y", &[1usize][..])]
        );

        let coarse = retrieval.index(IndexKind::Coarse).unwrap();
        assert_eq!(coarse.iter().collect::<Vec<_>>(), vec![("loc", &[0usize][..])]);
        assert!(retrieval.corpus().unwrap().rows()[2].has_malformed_output());
    }

    #[test]
    fn test_absent_label_is_empty() {
        let (_dir, retrieval) = built(&scenario_rows());
        assert!(retrieval.retrieve_by_schema("Z", 2, 1).unwrap().is_empty());
    }

    #[test]
    fn test_k_larger_than_pool() {
        let (_dir, retrieval) = built(&scenario_rows());
        let shots = retrieval.retrieve_by_coarse_type("loc", 5, 1).unwrap();
        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].position, 0);
        assert_eq!(shots[0].row.sentence, "row zero");
    }

    #[test]
    fn test_repeated_calls_are_deterministic() {
        let rows: Vec<ExampleRow> = (0..20)
            .map(|i| ExampleRow::new(format!("row {i}")).with_triple(triple("location", "R")))
            .collect();
        let (_dir, retrieval) = built(&rows);

        fn positions(shots: Vec<Shot<'_>>) -> Vec<usize> {
            shots.iter().map(|s| s.position).collect()
        }

        let first = positions(retrieval.retrieve_by_coarse_type("location", 3, 42).unwrap());
        let _ = retrieval.retrieve_by_schema("R", 5, 7).unwrap();
        let second = positions(retrieval.retrieve_by_coarse_type("location", 3, 42).unwrap());

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_index_names_both_paths() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_corpus(&dir, &scenario_rows());
        let retrieval = FewShotRetrieval::new(data, dir.path().join("nowhere"));

        let err = retrieval.retrieve_by_schema("X", 1, 1).unwrap_err();
        match err {
            TriplexError::IndexNotFound {
                coarse,
                relationship,
            } => {
                assert!(coarse.ends_with("coarse_index.json"));
                assert!(relationship.ends_with("relationship_index.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!retrieval.is_loaded());
        assert!(!dir.path().join("nowhere").exists());
    }

    #[test]
    fn test_one_missing_file_fails() {
        let (_dir, mut retrieval) = built(&scenario_rows());
        std::fs::remove_file(retrieval.relationship_index_path()).unwrap();

        assert!(matches!(
            retrieval.load_indexes(),
            Err(TriplexError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn test_lazy_load() {
        let (_dir, retrieval) = built(&scenario_rows());
        assert!(!retrieval.is_loaded());
        retrieval.retrieve_by_schema("X", 1, 1).unwrap();
        assert!(retrieval.is_loaded());
        assert_eq!(retrieval.meta().unwrap().num_examples, 3);
    }

    #[test]
    fn test_shrunken_corpus_drops_positions() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_corpus(&dir, &scenario_rows());
        let mut retrieval = FewShotRetrieval::new(&data, dir.path().join("index"));
        retrieval.build_indexes().unwrap();

        // Corpus replaced after the build: only row zero survives
        write_json_overwrite(&data, &scenario_rows()[..1]).unwrap();
        retrieval.load_indexes().unwrap();

        assert!(retrieval.retrieve_by_schema("Y", 3, 1).unwrap().is_empty());
        assert_eq!(retrieval.retrieve_by_schema("X", 3, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_shot_to_pair() {
        let (_dir, retrieval) = built(&scenario_rows());
        let shots = retrieval.retrieve_by_schema("X", 1, 3).unwrap();
        let pair = shots[0].to_pair();
        assert_eq!(pair.input.sentence, "row zero");
        assert_eq!(pair.output, scenario_rows()[0]["output"].as_array().unwrap().clone());
    }

    #[test]
    fn test_retrieved_pair_keeps_extra_triple_keys() {
        let entry = json!({
            "subject": {"name": "A", "coarse_type": "loc"},
            "relationship": "X",
            "object": ["B", "per", "town"],
            "evidence": "e1"
        });
        let (_dir, retrieval) = built(&[json!({"sentence": "s", "output": [entry.clone()]})]);

        let shots = retrieval.retrieve_by_schema("X", 1, 1).unwrap();
        assert_eq!(shots[0].to_pair().output, vec![entry]);
    }
}
