//! Entity-level evaluation
//!
//! Entity mentions are the subjects and objects of a row's triples, plus any
//! mentions listed under an `entities` field. Gold and predicted rows are
//! paired by position and compared as sets at one of three granularities.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use triplex_core::io::write_json_overwrite;
use triplex_core::{ExampleRow, Mention, Result, TriplexError};

use crate::metrics::{Counts, Prf};

/// Matching granularity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityMode {
    /// name, coarse type and fine type
    #[default]
    Strict,
    /// name and coarse type
    Medium,
    /// name only
    Loose,
}

impl EntityMode {
    fn key(&self, mention: &Mention) -> (String, String, String) {
        let name = mention.name.clone();
        match self {
            EntityMode::Strict => (name, mention.coarse().to_string(), mention.fine().to_string()),
            EntityMode::Medium => (name, mention.coarse().to_string(), String::new()),
            EntityMode::Loose => (name, String::new(), String::new()),
        }
    }
}

impl fmt::Display for EntityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityMode::Strict => write!(f, "strict"),
            EntityMode::Medium => write!(f, "medium"),
            EntityMode::Loose => write!(f, "loose"),
        }
    }
}

impl FromStr for EntityMode {
    type Err = TriplexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(EntityMode::Strict),
            "medium" => Ok(EntityMode::Medium),
            "loose" => Ok(EntityMode::Loose),
            other => Err(TriplexError::InvalidInput(format!(
                "unknown entity mode `{other}` (expected strict, medium or loose)"
            ))),
        }
    }
}

/// Distinct entity mentions of a row, in first-seen order
pub fn row_mentions(row: &ExampleRow) -> Vec<Mention> {
    let from_triples = row
        .output
        .iter()
        .flat_map(|t| [t.subject.clone(), t.object.clone()]);

    let listed = row
        .extra
        .get("entities")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(Mention::from_value);

    let mut seen = HashSet::new();
    from_triples
        .chain(listed)
        .filter(|m| !m.name.is_empty())
        .filter(|m| seen.insert((m.name.clone(), m.coarse_type.clone(), m.fine_type.clone())))
        .collect()
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReport {
    pub overall: Prf,
    pub counts: Counts,
    pub mode: EntityMode,
}

/// A row where gold and prediction disagree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSample {
    pub index: usize,
    pub sentence: String,
    pub coarse_types: Vec<String>,
    pub gold_entities: Vec<Mention>,
    pub pred_entities: Vec<Mention>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorStatistics {
    pub total_samples: usize,
    pub error_samples: usize,
    pub error_rate: f64,
    pub mode: EntityMode,
}

/// Rows with at least one false positive or false negative
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorAnalysis {
    pub error_statistics: ErrorStatistics,
    pub error_details: Vec<ErrorSample>,
}

impl ErrorAnalysis {
    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_overwrite(path, self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvaluation {
    pub report: EntityReport,
    pub errors: ErrorAnalysis,
}

// ============================================================================
// Evaluator
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct EntityEvaluator {
    mode: EntityMode,
}

impl EntityEvaluator {
    pub fn new(mode: EntityMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> EntityMode {
        self.mode
    }

    pub fn evaluate(&self, gold: &[ExampleRow], pred: &[ExampleRow]) -> EntityEvaluation {
        if gold.len() != pred.len() {
            tracing::warn!(
                "Gold has {} rows but predictions have {}; extra rows are ignored",
                gold.len(),
                pred.len()
            );
        }

        let mut counts = Counts::default();
        let mut details = Vec::new();

        for (index, (g, p)) in gold.iter().zip(pred).enumerate() {
            let gold_entities = row_mentions(g);
            let pred_entities = row_mentions(p);

            let gset: HashSet<_> = gold_entities.iter().map(|m| self.mode.key(m)).collect();
            let pset: HashSet<_> = pred_entities.iter().map(|m| self.mode.key(m)).collect();
            let row_counts = Counts::from_sets(&gset, &pset);
            counts += row_counts;

            if row_counts.has_errors() {
                details.push(ErrorSample {
                    index,
                    sentence: g.sentence.clone(),
                    coarse_types: g.coarse_types.clone(),
                    gold_entities,
                    pred_entities,
                });
            }
        }

        let total = gold.len().min(pred.len());
        tracing::debug!("{} of {} rows have entity errors", details.len(), total);

        EntityEvaluation {
            report: EntityReport {
                overall: counts.scores(),
                counts,
                mode: self.mode,
            },
            errors: ErrorAnalysis {
                error_statistics: ErrorStatistics {
                    total_samples: total,
                    error_samples: details.len(),
                    error_rate: if total == 0 {
                        0.0
                    } else {
                        details.len() as f64 / total as f64
                    },
                    mode: self.mode,
                },
                error_details: details,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
