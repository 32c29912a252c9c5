//! Shot selection
//!
//! Builds the ordered list of worked examples for one target sentence.
//! Candidates are drawn per schema entry and per coarse type, then taken in
//! priority order until the budget is filled:
//!
//! 1. rows retrieved through both a relationship and a coarse type
//! 2. rows retrieved only through a relationship
//! 3. rows retrieved only through a coarse type
//! 4. the static fallback pool
//!
//! Rows are compared by corpus position, and a position is used at most once.

use std::collections::HashSet;

use serde::Serialize;

use triplex_core::{Result, ShotPair};

use crate::fallback::fallback_pool;
use crate::retriever::{FewShotRetrieval, Shot};

/// Default number of candidates drawn per query label
pub const DEFAULT_PER_QUERY_K: usize = 3;

/// Default sampling seed
pub const DEFAULT_SEED: u64 = 42;

/// Where a selected shot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotSource {
    Intersection,
    Schema,
    Coarse,
    Fallback,
}

/// One selected example with its provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedShot {
    pub source: ShotSource,
    /// Corpus position; `None` for fallback examples
    pub position: Option<usize>,
    pub pair: ShotPair,
}

/// Priority-cascade shot selector over a retrieval session
#[derive(Debug, Clone)]
pub struct ShotSelector<'a> {
    retrieval: &'a FewShotRetrieval,
    fallback: &'a [ShotPair],
    per_query_k: usize,
    seed: u64,
}

impl<'a> ShotSelector<'a> {
    pub fn new(retrieval: &'a FewShotRetrieval) -> Self {
        Self {
            retrieval,
            fallback: fallback_pool(),
            per_query_k: DEFAULT_PER_QUERY_K,
            seed: DEFAULT_SEED,
        }
    }

    pub fn with_per_query_k(mut self, k: usize) -> Self {
        self.per_query_k = k;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Replace the static fallback pool
    pub fn with_fallback(mut self, fallback: &'a [ShotPair]) -> Self {
        self.fallback = fallback;
        self
    }

    /// Select up to `n` shots with their provenance
    pub fn select(
        &self,
        coarse_types: &[String],
        schema: &[String],
        n: usize,
    ) -> Result<Vec<SelectedShot>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let schema_shots = self.gather(schema, |label| {
            self.retrieval
                .retrieve_by_schema(label, self.per_query_k, self.seed)
        })?;
        let coarse_shots = self.gather(coarse_types, |label| {
            self.retrieval
                .retrieve_by_coarse_type(label, self.per_query_k, self.seed)
        })?;

        let schema_positions: HashSet<usize> = schema_shots.iter().map(|s| s.position).collect();
        let coarse_positions: HashSet<usize> = coarse_shots.iter().map(|s| s.position).collect();

        let mut picker = Picker::new(n);

        for shot in schema_shots.iter().filter(|s| coarse_positions.contains(&s.position)) {
            picker.push_shot(shot, ShotSource::Intersection);
        }
        for shot in schema_shots.iter().filter(|s| !coarse_positions.contains(&s.position)) {
            picker.push_shot(shot, ShotSource::Schema);
        }
        for shot in coarse_shots.iter().filter(|s| !schema_positions.contains(&s.position)) {
            picker.push_shot(shot, ShotSource::Coarse);
        }
        for pair in self.fallback {
            picker.push_fallback(pair);
        }

        let selected = picker.finish();
        tracing::debug!(
            "Selected {} shots ({} schema candidates, {} coarse candidates)",
            selected.len(),
            schema_shots.len(),
            coarse_shots.len()
        );

        Ok(selected)
    }

    /// Select up to `n` (input, output) pairs
    pub fn select_shots(
        &self,
        coarse_types: &[String],
        schema: &[String],
        n: usize,
    ) -> Result<Vec<ShotPair>> {
        Ok(self
            .select(coarse_types, schema, n)?
            .into_iter()
            .map(|s| s.pair)
            .collect())
    }

    fn gather<F>(&self, labels: &[String], mut retrieve: F) -> Result<Vec<Shot<'a>>>
    where
        F: FnMut(&str) -> Result<Vec<Shot<'a>>>,
    {
        let mut shots = Vec::new();
        for label in labels {
            shots.extend(retrieve(label)?);
        }
        Ok(shots)
    }
}

/// Accumulates shots until the budget is reached
struct Picker {
    budget: usize,
    seen: HashSet<usize>,
    selected: Vec<SelectedShot>,
}

impl Picker {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            seen: HashSet::new(),
            selected: Vec::with_capacity(budget),
        }
    }

    fn is_full(&self) -> bool {
        self.selected.len() >= self.budget
    }

    fn push_shot(&mut self, shot: &Shot<'_>, source: ShotSource) {
        if self.is_full() || !self.seen.insert(shot.position) {
            return;
        }
        self.selected.push(SelectedShot {
            source,
            position: Some(shot.position),
            pair: shot.to_pair(),
        });
    }

    fn push_fallback(&mut self, pair: &ShotPair) {
        if self.is_full() {
            return;
        }
        self.selected.push(SelectedShot {
            source: ShotSource::Fallback,
            position: None,
            pair: pair.clone(),
        });
    }

    fn finish(self) -> Vec<SelectedShot> {
        self.selected
    }
}

// ============================================================================
// Tests
// ============================================================================
