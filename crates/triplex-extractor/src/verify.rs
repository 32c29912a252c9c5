//! Entity self-verification
//!
//! Asks the model, one entity at a time, whether an annotated span really is
//! an entity of its coarse type. Answers are read as yes, no or undecided;
//! only entities answered yes are kept as verified.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::Value;

use triplex_core::io::write_json_overwrite;
use triplex_core::{ChatMessage, ExampleRow, LlmClient, Mention, Result, TriplexError};

use crate::prompt::substitute;
use crate::templates;

const YES: &[&str] = &["yes", "y", "true", "是", "对", "正确", "属于", "是的"];
const NO: &[&str] = &["no", "n", "false", "否", "不是", "不", "不属于", "不正确", "错误"];

/// Read a yes/no verdict from a model answer
///
/// Only the first line counts. An exact match wins; otherwise the first
/// English yes/no word decides, then the longest Chinese phrase found.
pub fn parse_yes_no(text: &str) -> Option<bool> {
    let lowered = text.trim().to_lowercase();
    let line = lowered.lines().next().unwrap_or_default().trim();

    let verdict = |term: &str| {
        if YES.iter().any(|t| *t == term) {
            Some(true)
        } else if NO.iter().any(|t| *t == term) {
            Some(false)
        } else {
            None
        }
    };

    if let Some(answer) = verdict(line) {
        return Some(answer);
    }

    let by_word = line
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| word.len() > 1)
        .find_map(verdict);
    if by_word.is_some() {
        return by_word;
    }

    YES.iter()
        .chain(NO)
        .filter(|term| !term.is_ascii() && line.contains(**term))
        .max_by_key(|term| term.chars().count())
        .and_then(|term| verdict(*term))
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VerifiedEntity {
    pub name: String,
    pub coarse_type: String,
}

/// The model's verdict on one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityCheck {
    pub name: String,
    pub coarse_type: String,
    pub is_valid: Option<bool>,
    pub llm_answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptTrace {
    pub name: String,
    pub coarse_type: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub llm_answer: String,
}

/// Verification outcome for one row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationRecord {
    pub id: String,
    pub source: String,
    pub sentence: String,
    pub coarse_types: Vec<String>,
    pub entities: Vec<VerifiedEntity>,
    pub verification: Vec<EntityCheck>,
    pub verified_entities: Vec<VerifiedEntity>,
    pub prompts_and_answers: Vec<PromptTrace>,
}

/// Entities to check for a row: its `entities` list when present, otherwise
/// the distinct subjects and objects of its triples
pub fn row_entities(row: &ExampleRow) -> Vec<VerifiedEntity> {
    let mentions: Vec<Mention> = match row.extra.get("entities").and_then(Value::as_array) {
        Some(listed) => listed.iter().map(Mention::from_value).collect(),
        None => row
            .output
            .iter()
            .flat_map(|t| [t.subject.clone(), t.object.clone()])
            .collect(),
    };

    let mut seen = HashSet::new();
    mentions
        .into_iter()
        .filter(|m| !m.name.is_empty())
        .map(|m| VerifiedEntity {
            coarse_type: m.coarse().to_string(),
            name: m.name,
        })
        .filter(|e| seen.insert(e.clone()))
        .collect()
}

// ============================================================================
// Verifier
// ============================================================================

pub struct SelfVerifier {
    client: Box<dyn LlmClient>,
    concurrency: usize,
}

impl SelfVerifier {
    pub fn new(client: Box<dyn LlmClient>) -> Self {
        Self {
            client,
            concurrency: 1,
        }
    }

    /// Entity checks in flight at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    fn prompts(&self, sentence: &str, entity: &VerifiedEntity) -> Result<(String, String)> {
        let vars = HashMap::from([
            ("sentence".to_string(), sentence.to_string()),
            ("entity".to_string(), entity.name.clone()),
            ("entity_type".to_string(), entity.coarse_type.clone()),
        ]);
        Ok((
            substitute(templates::VERIFY_SYSTEM, &vars)?,
            substitute(templates::VERIFY_USER, &vars)?,
        ))
    }

    /// Check every entity of `row`; `position` stands in for a missing id
    ///
    /// A failed model call leaves the entity undecided with an empty answer.
    pub async fn verify_row(&self, row: &ExampleRow, position: usize) -> Result<VerificationRecord> {
        let entities = row_entities(row);
        let client = self.client.as_ref();

        let traces: Vec<PromptTrace> = stream::iter(&entities)
            .map(|entity| async move {
                let (system_prompt, user_prompt) = self.prompts(&row.sentence, entity)?;
                let messages = [
                    ChatMessage::system(system_prompt.as_str()),
                    ChatMessage::user(user_prompt.as_str()),
                ];
                let llm_answer = client.chat(&messages).await.unwrap_or_else(|e| {
                    tracing::warn!("Verifying `{}` in row {} failed: {}", entity.name, position, e);
                    String::new()
                });
                Ok::<_, TriplexError>(PromptTrace {
                    name: entity.name.clone(),
                    coarse_type: entity.coarse_type.clone(),
                    system_prompt,
                    user_prompt,
                    llm_answer,
                })
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let verification: Vec<EntityCheck> = traces
            .iter()
            .map(|trace| EntityCheck {
                name: trace.name.clone(),
                coarse_type: trace.coarse_type.clone(),
                is_valid: parse_yes_no(&trace.llm_answer),
                llm_answer: trace.llm_answer.clone(),
            })
            .collect();

        let verified_entities = verification
            .iter()
            .filter(|check| check.is_valid == Some(true))
            .map(|check| VerifiedEntity {
                name: check.name.clone(),
                coarse_type: check.coarse_type.clone(),
            })
            .collect();

        Ok(VerificationRecord {
            id: row
                .id()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| position.to_string()),
            source: row
                .extra
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            sentence: row.sentence.clone(),
            coarse_types: row.coarse_types.clone(),
            entities,
            verification,
            verified_entities,
            prompts_and_answers: traces,
        })
    }

    /// Verify rows in order, checking up to the configured number of
    /// entities of a row at once
    pub async fn verify_all(&self, rows: &[ExampleRow]) -> Result<Vec<VerificationRecord>> {
        tracing::info!("Verifying entities of {} rows with {}", rows.len(), self.client.model());

        let records: Vec<VerificationRecord> = stream::iter(rows.iter().enumerate())
            .then(|(position, row)| self.verify_row(row, position))
            .try_collect()
            .await?;

        let (checked, kept) = records.iter().fold((0, 0), |(checked, kept), r| {
            (checked + r.verification.len(), kept + r.verified_entities.len())
        });
        tracing::info!("Kept {} of {} entities", kept, checked);

        Ok(records)
    }
}

/// Write verification records as a JSON array, replacing any existing file
pub fn write_verification(path: &Path, records: &[VerificationRecord]) -> Result<()> {
    write_json_overwrite(path, records)
}

// ============================================================================
// Tests
// ============================================================================
