//! Precision / recall / F1 arithmetic

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// True positive, false positive and false negative counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl Counts {
    pub fn new(true_positives: usize, false_positives: usize, false_negatives: usize) -> Self {
        Self {
            true_positives,
            false_positives,
            false_negatives,
        }
    }

    /// Compare two key sets: |G∩P|, |P−G|, |G−P|
    pub fn from_sets<K: Eq + Hash>(gold: &HashSet<K>, pred: &HashSet<K>) -> Self {
        Self {
            true_positives: gold.intersection(pred).count(),
            false_positives: pred.difference(gold).count(),
            false_negatives: gold.difference(pred).count(),
        }
    }

    /// Precision (TP / (TP + FP))
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// Recall (TP / (TP + FN))
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// F1 score (2 * P * R / (P + R))
    pub fn f1_score(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn has_errors(&self) -> bool {
        self.false_positives > 0 || self.false_negatives > 0
    }

    pub fn scores(&self) -> Prf {
        Prf {
            precision: self.precision(),
            recall: self.recall(),
            f1: self.f1_score(),
        }
    }
}

impl std::ops::AddAssign for Counts {
    fn add_assign(&mut self, other: Self) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Reported scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Prf {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Counts keyed by label, reported in sorted label order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelCounts {
    counts: BTreeMap<String, Counts>,
}

impl LabelCounts {
    pub fn tp(&mut self, label: &str) {
        self.entry(label).true_positives += 1;
    }

    pub fn fp(&mut self, label: &str) {
        self.entry(label).false_positives += 1;
    }

    pub fn fn_(&mut self, label: &str) {
        self.entry(label).false_negatives += 1;
    }

    pub fn get(&self, label: &str) -> Counts {
        self.counts.get(label).copied().unwrap_or_default()
    }

    pub fn scores(&self) -> BTreeMap<String, Prf> {
        self.counts
            .iter()
            .map(|(label, counts)| (label.clone(), counts.scores()))
            .collect()
    }

    fn entry(&mut self, label: &str) -> &mut Counts {
        self.counts.entry(label.to_string()).or_default()
    }
}
