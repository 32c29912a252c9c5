//! Triple-level evaluation
//!
//! Gold and predicted rows are paired by position. Each row's triples are
//! reduced to key sets and compared:
//! - strict: (subject name, subject coarse type, relationship, object name, object coarse type)
//! - loose: (subject name, relationship, object name)
//!
//! Strict mode can additionally judge fine types by embedding similarity.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use triplex_core::{EvaluationConfig, ExampleRow, Result, Triple, TriplexError};

use crate::embedding::{cosine_similarity, EmbeddingClient};
use crate::metrics::{Counts, LabelCounts, Prf};

/// Stand-in embedded for an empty fine type
pub const EMPTY_FINE_TYPE: &str = "<EMPTY>";

// ============================================================================
// Options and Report
// ============================================================================

/// How triples are compared
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripleEvalOptions {
    /// Compare coarse types as well as names and relationship
    pub strict: bool,
    /// Break strict results down by coarse type
    pub by_type: bool,
    /// Judge fine types by embedding similarity (strict only)
    pub strict_semantic: bool,
    /// Cosine threshold for a semantic match
    pub threshold: f32,
}

impl Default for TripleEvalOptions {
    fn default() -> Self {
        Self::from_config(&EvaluationConfig::default())
    }
}

impl TripleEvalOptions {
    pub fn from_config(config: &EvaluationConfig) -> Self {
        Self {
            strict: config.strict,
            by_type: config.by_type,
            strict_semantic: config.strict_semantic,
            threshold: config.threshold,
        }
    }

    pub fn loose() -> Self {
        Self {
            strict: false,
            by_type: false,
            strict_semantic: false,
            ..Self::default()
        }
    }

    fn semantic(&self) -> bool {
        self.strict && self.strict_semantic
    }
}

/// Settings echoed in the report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportConfig {
    pub strict: bool,
    pub strict_semantic: bool,
    pub model_name: Option<String>,
    pub threshold: Option<f32>,
}

/// Triple evaluation report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripleReport {
    pub overall: Prf,
    pub counts: Counts,
    pub num_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_coarse_type: Option<BTreeMap<String, Prf>>,
    pub config: ReportConfig,
}

// ============================================================================
// Keys
// ============================================================================

type StrictKey = (String, String, String, String, String);
type LooseKey = (String, String, String);

fn strict_key(t: &Triple) -> StrictKey {
    (
        t.subject.name.clone(),
        t.subject.coarse().to_string(),
        t.relationship.clone(),
        t.object.name.clone(),
        t.object.coarse().to_string(),
    )
}

fn loose_key(t: &Triple) -> LooseKey {
    (
        t.subject.name.clone(),
        t.relationship.clone(),
        t.object.name.clone(),
    )
}

/// (name, coarse type) -> fine type over subjects and objects; later mentions win
fn fine_type_map(row: &ExampleRow) -> HashMap<(String, String), String> {
    let mut map = HashMap::new();
    for triple in &row.output {
        for mention in [&triple.subject, &triple.object] {
            map.insert(
                (mention.name.clone(), mention.coarse().to_string()),
                mention.fine().to_string(),
            );
        }
    }
    map
}

fn embeddable(fine_type: &str) -> String {
    if fine_type.is_empty() {
        EMPTY_FINE_TYPE.to_string()
    } else {
        fine_type.to_string()
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Triple evaluator; semantic mode needs an embedding client
pub struct TripleEvaluator<'a> {
    options: TripleEvalOptions,
    embedder: Option<&'a dyn EmbeddingClient>,
}

impl<'a> TripleEvaluator<'a> {
    pub fn new(options: TripleEvalOptions) -> Self {
        Self {
            options,
            embedder: None,
        }
    }

    pub fn with_embedder(mut self, embedder: &'a dyn EmbeddingClient) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn options(&self) -> &TripleEvalOptions {
        &self.options
    }

    /// Evaluate in whichever mode the options select
    pub async fn evaluate(&self, gold: &[ExampleRow], pred: &[ExampleRow]) -> Result<TripleReport> {
        if self.options.semantic() {
            self.evaluate_semantic(gold, pred).await
        } else {
            Ok(self.evaluate_exact(gold, pred))
        }
    }

    /// Exact key matching, strict or loose
    pub fn evaluate_exact(&self, gold: &[ExampleRow], pred: &[ExampleRow]) -> TripleReport {
        warn_on_length_mismatch(gold, pred);

        let by_type = self.options.strict && self.options.by_type;
        let mut counts = Counts::default();
        let mut per_type = LabelCounts::default();

        for (g, p) in gold.iter().zip(pred) {
            if self.options.strict {
                let gset: HashSet<StrictKey> = g.output.iter().map(strict_key).collect();
                let pset: HashSet<StrictKey> = p.output.iter().map(strict_key).collect();
                counts += Counts::from_sets(&gset, &pset);

                if by_type {
                    // attributed to the subject's coarse type
                    gset.intersection(&pset).for_each(|k| per_type.tp(&k.1));
                    pset.difference(&gset).for_each(|k| per_type.fp(&k.1));
                    gset.difference(&pset).for_each(|k| per_type.fn_(&k.1));
                }
            } else {
                let gset: HashSet<LooseKey> = g.output.iter().map(loose_key).collect();
                let pset: HashSet<LooseKey> = p.output.iter().map(loose_key).collect();
                counts += Counts::from_sets(&gset, &pset);
            }
        }

        self.report(counts, gold.len().min(pred.len()), by_type.then_some(per_type), None)
    }

    /// Strict matching with fine types judged by embedding similarity
    ///
    /// Mentions are keyed by (name, coarse type). Keys found on one side only
    /// count as FP or FN. Shared keys with equal fine types are TP; otherwise
    /// the fine types are embedded and a cosine similarity at or above the
    /// threshold is TP, anything below is both FP and FN.
    pub async fn evaluate_semantic(
        &self,
        gold: &[ExampleRow],
        pred: &[ExampleRow],
    ) -> Result<TripleReport> {
        let embedder = self.embedder.ok_or_else(|| {
            TriplexError::InvalidInput("semantic evaluation needs an embedding client".to_string())
        })?;
        warn_on_length_mismatch(gold, pred);

        let mut counts = Counts::default();
        let mut per_type = LabelCounts::default();

        for (g, p) in gold.iter().zip(pred) {
            let gmap = fine_type_map(g);
            let pmap = fine_type_map(p);

            for key in pmap.keys().filter(|k| !gmap.contains_key(*k)) {
                counts.false_positives += 1;
                per_type.fp(&key.1);
            }
            for key in gmap.keys().filter(|k| !pmap.contains_key(*k)) {
                counts.false_negatives += 1;
                per_type.fn_(&key.1);
            }

            let mut differing = Vec::new();
            for (key, gold_fine) in &gmap {
                let Some(pred_fine) = pmap.get(key) else {
                    continue;
                };
                if pred_fine == gold_fine {
                    counts.true_positives += 1;
                    per_type.tp(&key.1);
                } else {
                    differing.push((key, pred_fine, gold_fine));
                }
            }

            if differing.is_empty() {
                continue;
            }

            let pred_texts: Vec<String> = differing.iter().map(|(_, p, _)| embeddable(p)).collect();
            let gold_texts: Vec<String> = differing.iter().map(|(_, _, g)| embeddable(g)).collect();
            let pred_emb = embedder.embed_batch(&pred_texts).await?;
            let gold_emb = embedder.embed_batch(&gold_texts).await?;

            for ((key, _, _), (pe, ge)) in differing.iter().zip(pred_emb.iter().zip(&gold_emb)) {
                if cosine_similarity(pe, ge) >= self.options.threshold {
                    counts.true_positives += 1;
                    per_type.tp(&key.1);
                } else {
                    counts.false_positives += 1;
                    counts.false_negatives += 1;
                    per_type.fp(&key.1);
                    per_type.fn_(&key.1);
                }
            }
        }

        Ok(self.report(
            counts,
            gold.len().min(pred.len()),
            self.options.by_type.then_some(per_type),
            Some(embedder.model().to_string()),
        ))
    }

    fn report(
        &self,
        counts: Counts,
        num_rows: usize,
        per_type: Option<LabelCounts>,
        model_name: Option<String>,
    ) -> TripleReport {
        let semantic = self.options.semantic();
        TripleReport {
            overall: counts.scores(),
            counts,
            num_rows,
            by_coarse_type: per_type.map(|p| p.scores()),
            config: ReportConfig {
                strict: self.options.strict,
                strict_semantic: self.options.strict_semantic,
                model_name: model_name.filter(|_| semantic),
                threshold: semantic.then_some(self.options.threshold),
            },
        }
    }
}

fn warn_on_length_mismatch(gold: &[ExampleRow], pred: &[ExampleRow]) {
    if gold.len() != pred.len() {
        tracing::warn!(
            "Gold has {} rows but predictions have {}; extra rows are ignored",
            gold.len(),
            pred.len()
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use triplex_core::Mention;

    fn triple(s: (&str, &str, &str), rel: &str, o: (&str, &str, &str)) -> Triple {
        Triple::new(
            Mention::new(s.0, s.1, s.2),
            rel,
            Mention::new(o.0, o.1, o.2),
        )
    }

    fn row(triples: Vec<Triple>) -> ExampleRow {
        triples
            .into_iter()
            .fold(ExampleRow::new("s"), |row, t| row.with_triple(t))
    }

    /// Maps a handful of fine types onto fixed directions
    struct TableEmbedding;

    #[async_trait]
    impl EmbeddingClient for TableEmbedding {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| match t.as_str() {
                    "city" => vec![1.0, 0.0, 0.0],
                    "town" => vec![0.95, 0.1, 0.0],
                    "country" => vec![0.0, 1.0, 0.0],
                    _ => vec![0.0, 0.0, 1.0],
                })
                .collect())
        }

        fn model(&self) -> &str {
            "table"
        }
    }

    #[test]
    fn test_strict_counts() {
        let gold = vec![row(vec![
            triple(("Paris", "loc", "city"), "capital of", ("France", "loc", "country")),
            triple(("Macron", "per", "politician"), "president of", ("France", "loc", "country")),
        ])];
        let pred = vec![row(vec![
            triple(("Paris", "loc", "town"), "capital of", ("France", "loc", "state")),
            triple(("Macron", "org", "x"), "president of", ("France", "loc", "country")),
        ])];

        let report = TripleEvaluator::new(TripleEvalOptions::default()).evaluate_exact(&gold, &pred);
        assert_eq!(report.counts, Counts::new(1, 1, 1));
        assert!((report.overall.f1 - 0.5).abs() < 1e-9);
        assert!(report.by_coarse_type.is_none());
        assert!(report.config.threshold.is_none());
    }

    #[test]
    fn test_loose_ignores_types() {
        let gold = vec![row(vec![triple(("Paris", "loc", "city"), "capital of", ("France", "loc", "country"))])];
        let pred = vec![row(vec![triple(("Paris", "org", ""), "capital of", ("France", "", ""))])];

        let report = TripleEvaluator::new(TripleEvalOptions::loose()).evaluate_exact(&gold, &pred);
        assert_eq!(report.counts, Counts::new(1, 0, 0));
        assert!(!report.config.strict);
    }

    #[test]
    fn test_by_type_uses_subject_coarse_type() {
        let gold = vec![row(vec![
            triple(("Paris", "loc", "city"), "capital of", ("France", "loc", "country")),
            triple(("Macron", "per", "p"), "president of", ("France", "loc", "country")),
        ])];
        let pred = vec![row(vec![triple(
            ("Paris", "loc", "city"),
            "capital of",
            ("France", "loc", "country"),
        )])];

        let options = TripleEvalOptions {
            by_type: true,
            ..TripleEvalOptions::default()
        };
        let report = TripleEvaluator::new(options).evaluate_exact(&gold, &pred);
        let by_type = report.by_coarse_type.unwrap();

        assert_eq!(by_type["loc"].f1, 1.0);
        assert_eq!(by_type["per"].recall, 0.0);
    }

    #[test]
    fn test_rows_pair_by_position() {
        let t = triple(("a", "x", ""), "r", ("b", "x", ""));
        let gold = vec![row(vec![t.clone()]), row(vec![])];
        let pred = vec![row(vec![]), row(vec![t])];

        let report = TripleEvaluator::new(TripleEvalOptions::default()).evaluate_exact(&gold, &pred);
        assert_eq!(report.counts, Counts::new(0, 1, 1));
        assert_eq!(report.num_rows, 2);
    }

    #[tokio::test]
    async fn test_semantic_fine_types() {
        let gold = vec![row(vec![
            triple(("Paris", "loc", "city"), "capital of", ("France", "loc", "country")),
            triple(("Lyon", "loc", "city"), "in", ("Rhone", "loc", "")),
        ])];
        let pred = vec![row(vec![
            // Paris: town ~ city (match), France: exact, Lyon: country vs city (miss)
            triple(("Paris", "loc", "town"), "capital of", ("France", "loc", "country")),
            triple(("Lyon", "loc", "country"), "in", ("Berlin", "loc", "city")),
        ])];

        let options = TripleEvalOptions {
            strict_semantic: true,
            by_type: true,
            ..TripleEvalOptions::default()
        };
        let embedder = TableEmbedding;
        let report = TripleEvaluator::new(options)
            .with_embedder(&embedder)
            .evaluate(&gold, &pred)
            .await
            .unwrap();

        // TP: Paris, France. Lyon: FP+FN. Berlin: FP. Rhone: FN.
        assert_eq!(report.counts, Counts::new(2, 2, 2));
        assert_eq!(report.config.model_name.as_deref(), Some("table"));
        assert_eq!(report.config.threshold, Some(0.80));
        assert!(report.by_coarse_type.unwrap().contains_key("loc"));
    }

    #[tokio::test]
    async fn test_semantic_without_embedder_fails() {
        let options = TripleEvalOptions {
            strict_semantic: true,
            ..TripleEvalOptions::default()
        };
        let err = TripleEvaluator::new(options)
            .evaluate(&[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TriplexError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_loose_ignores_semantic_flag() {
        let options = TripleEvalOptions {
            strict: false,
            strict_semantic: true,
            ..TripleEvalOptions::default()
        };
        let report = TripleEvaluator::new(options).evaluate(&[], &[]).await.unwrap();
        assert_eq!(report.counts, Counts::default());
        assert!(report.config.model_name.is_none());
    }
}
