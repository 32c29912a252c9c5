//! LLM triple extraction pipeline
//!
//! For each row: select worked examples by the row's schema and coarse types,
//! render the chat prompt, ask the model, and parse the triples out of its
//! answer. Batches run with a bounded number of requests in flight and keep
//! input order so predictions line up with gold rows.

use std::collections::HashMap;
use std::path::Path;

use futures::stream::{self, StreamExt};
use serde_json::Value;

use triplex_core::io::write_json_overwrite;
use triplex_core::{AppConfig, ChatMessage, ExampleRow, LlmClient, Result, Triple, TriplexError};
use triplex_retrieval::{FewShotRetrieval, ShotSelector};

use crate::prompt::TemplateRegistry;

// ============================================================================
// Settings
// ============================================================================

/// Knobs of the extraction pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorSettings {
    /// Prompt template name
    pub template: String,
    /// Shots selected per row
    pub num_shots: usize,
    /// Candidates drawn per schema entry / coarse type
    pub per_query_k: usize,
    /// Sampling seed
    pub seed: u64,
    /// Upper bound on shots rendered into one prompt
    pub max_few_shot: usize,
    /// Requests in flight at once
    pub concurrency: usize,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ExtractorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            template: config.extraction.template.clone(),
            num_shots: config.retrieval.num_shots,
            per_query_k: config.retrieval.per_query_k,
            seed: config.retrieval.seed,
            max_few_shot: config.extraction.max_few_shot,
            concurrency: config.extraction.concurrency,
        }
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Few-shot prompted triple extractor
pub struct TripleExtractor {
    client: Box<dyn LlmClient>,
    retrieval: FewShotRetrieval,
    registry: TemplateRegistry,
    settings: ExtractorSettings,
}

impl TripleExtractor {
    pub fn new(client: Box<dyn LlmClient>, retrieval: FewShotRetrieval) -> Self {
        Self {
            client,
            retrieval,
            registry: TemplateRegistry::builtin(),
            settings: ExtractorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ExtractorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_registry(mut self, registry: TemplateRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    pub fn retrieval(&self) -> &FewShotRetrieval {
        &self.retrieval
    }

    /// Chat prompt for one row
    pub fn prepare(&self, row: &ExampleRow) -> Result<Vec<ChatMessage>> {
        let shots = ShotSelector::new(&self.retrieval)
            .with_per_query_k(self.settings.per_query_k)
            .with_seed(self.settings.seed)
            .select_shots(&row.coarse_types, &row.schema, self.settings.num_shots)?;

        let passage = serde_json::to_value(row.input())
            .map_err(|e| TriplexError::parse("extraction input", e))?;

        self.registry.build_chat_prompt(
            &self.settings.template,
            &passage,
            &shots,
            &HashMap::new(),
            self.settings.max_few_shot,
        )
    }

    /// Extract triples from one row
    pub async fn extract(&self, row: &ExampleRow) -> Result<Vec<Triple>> {
        let messages = self.prepare(row)?;
        let reply = self.client.chat(&messages).await?;
        parse_output(&reply)
    }

    /// Extract every row, returning one prediction per input row
    ///
    /// Prompt assembly errors (a missing index, an unknown template) abort the
    /// batch. A row whose model call or answer fails is logged and predicted
    /// as empty.
    pub async fn extract_all(&self, rows: &[ExampleRow]) -> Result<Vec<ExampleRow>> {
        let prompts = rows
            .iter()
            .map(|row| self.prepare(row))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            "Extracting {} rows with {} ({} in flight)",
            rows.len(),
            self.client.model(),
            self.settings.concurrency.max(1)
        );

        let client = self.client.as_ref();
        let answers: Vec<Result<Vec<Triple>>> = stream::iter(prompts)
            .map(|messages| async move {
                let reply = client.chat(&messages).await?;
                parse_output(&reply)
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut failures = 0;
        let predictions = rows
            .iter()
            .zip(answers)
            .enumerate()
            .map(|(position, (row, answer))| {
                let output = answer.unwrap_or_else(|e| {
                    failures += 1;
                    tracing::warn!("Row {} ({:?}) failed: {}", position, row.id(), e);
                    Vec::new()
                });
                row.clone().with_output(output)
            })
            .collect::<Vec<_>>();

        tracing::info!(
            "Extracted {} rows, {} failed",
            predictions.len(),
            failures
        );

        Ok(predictions)
    }
}

/// Write predictions as a JSON array, replacing any existing file
pub fn write_predictions(path: &Path, predictions: &[ExampleRow]) -> Result<()> {
    write_json_overwrite(path, predictions)
}

// ============================================================================
// Answer Parsing
// ============================================================================

/// Parse triples from a model answer
///
/// Markdown code fences and text around the outermost JSON object are
/// ignored. Triples are read from `output` (or `triples`); a bare JSON array
/// is also accepted.
pub fn parse_output(text: &str) -> Result<Vec<Triple>> {
    let body = strip_code_fence(text.trim());

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => {
            let object = outermost_object(body)
                .ok_or_else(|| TriplexError::parse("model answer", "no JSON object found"))?;
            serde_json::from_str(object).map_err(|e| TriplexError::parse("model answer", e))?
        }
    };

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(fields) => match fields.get("output").or_else(|| fields.get("triples")) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(TriplexError::parse(
                    "model answer",
                    "`output` is not an array",
                ))
            }
            None => return Ok(Vec::new()),
        },
        _ => {
            return Err(TriplexError::parse(
                "model answer",
                "expected a JSON object",
            ))
        }
    };

    Ok(items.iter().filter_map(Triple::from_value).collect())
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (`json`) on the opening fence line
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use triplex_core::{Mention, Role};

    const ANSWER: &str = r#"{"output": [{"subject": ["Paris", "loc", "city"], "relationship": "capital of", "object": ["France", "loc", "country"]}]}"#;

    /// Replies with a fixed answer, or garbage when the prompt mentions `fail`
    struct MockClient {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmClient for MockClient {
        async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            if last.contains("fail") {
                Err(TriplexError::LlmError("boom".to_string()))
            } else {
                Ok(format!("```json\n{ANSWER}\n```"))
            }
        }

        fn model(&self) -> &str {
            "mock"
        }
    }

    fn corpus_rows() -> Vec<ExampleRow> {
        (0..6)
            .map(|i| {
                ExampleRow::new(format!("corpus {i}"))
                    .with_schema(["capital of"])
                    .with_triple(Triple::new(
                        Mention::new("A", "loc", "city"),
                        "capital of",
                        Mention::new("B", "loc", "country"),
                    ))
            })
            .collect()
    }

    fn extractor() -> (TempDir, TripleExtractor, Arc<AtomicUsize>) {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("train.json");
        write_json_overwrite(&data, &corpus_rows()).unwrap();

        let mut retrieval = FewShotRetrieval::new(data, dir.path().join("index"));
        retrieval.build_indexes().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let client = MockClient {
            calls: calls.clone(),
        };
        (dir, TripleExtractor::new(Box::new(client), retrieval), calls)
    }

    #[test]
    fn test_parse_plain_object() {
        let triples = parse_output(ANSWER).unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].subject, Mention::new("Paris", "loc", "city"));
    }

    #[test]
    fn test_parse_fenced_and_chatty() {
        let fenced = format!("```json\n{ANSWER}\n```");
        assert_eq!(parse_output(&fenced).unwrap().len(), 1);

        let chatty = format!("Sure! Here you go:\n{ANSWER}\nHope this helps.");
        assert_eq!(parse_output(&chatty).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_alternative_shapes() {
        assert!(parse_output(r#"{"output": []}"#).unwrap().is_empty());
        assert!(parse_output(r#"{"entities": []}"#).unwrap().is_empty());
        assert_eq!(
            parse_output(r#"{"triples": [{"subject": ["a"], "relationship": "r", "object": ["b"]}]}"#)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            parse_output(r#"[{"subject": ["a"], "relationship": "r", "object": ["b"]}, 3]"#)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_output("I could not find anything."),
            Err(TriplexError::Parse { .. })
        ));
        assert!(parse_output(r#"{"output": "none"}"#).is_err());
    }

    #[test]
    fn test_prepare_uses_retrieved_shots() {
        let (_dir, extractor, _) = extractor();
        let row = ExampleRow::new("Paris is the capital of France.")
            .with_schema(["capital of"])
            .with_coarse_types(["loc"]);

        let messages = extractor.prepare(&row).unwrap();

        // system + 5 shot pairs + target
        assert_eq!(messages.len(), 1 + 5 * 2 + 1);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1].content.contains("corpus "));
        assert!(messages
            .last()
            .unwrap()
            .content
            .contains("Paris is the capital of France."));
    }

    #[tokio::test]
    async fn test_extract_one() {
        let (_dir, extractor, calls) = extractor();
        let triples = extractor
            .extract(&ExampleRow::new("Paris is the capital of France."))
            .await
            .unwrap();

        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].relationship, "capital of");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_extract_all_keeps_order_and_tolerates_failures() {
        let (_dir, extractor, calls) = extractor();
        let extractor = extractor.with_settings(ExtractorSettings {
            concurrency: 2,
            ..ExtractorSettings::default()
        });

        let mut rows: Vec<ExampleRow> = ["first", "please fail", "third"]
            .iter()
            .map(|s| ExampleRow::new(*s))
            .collect();
        rows[0].extra.insert("id".to_string(), serde_json::json!("r-0"));

        let predictions = extractor.extract_all(&rows).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0].sentence, "first");
        assert_eq!(predictions[0].id().as_deref(), Some("r-0"));
        assert_eq!(predictions[0].output.len(), 1);
        assert!(predictions[1].output.is_empty());
        assert_eq!(predictions[2].sentence, "third");
        assert_eq!(predictions[2].output.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_template_aborts_batch() {
        let (_dir, extractor, calls) = extractor();
        let extractor = extractor.with_settings(ExtractorSettings {
            template: "nope".to_string(),
            ..ExtractorSettings::default()
        });

        let err = extractor
            .extract_all(&[ExampleRow::new("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, TriplexError::NotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_write_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pred.json");
        write_predictions(&path, &corpus_rows()[..2]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let values: Vec<Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["output"][0]["subject"], serde_json::json!(["A", "loc", "city"]));
    }
}
