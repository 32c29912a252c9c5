//! Triplex CLI - Command-line interface
//!
//! Usage:
//!   triplex build-index --data corpus.jsonl
//!   triplex retrieve --schema 国籍 -k 3
//!   triplex shots --coarse-types person,location --schema 国籍 -n 5
//!   triplex extract --input test.json --output pred.json
//!   triplex evaluate --gold test.json --pred pred.json --by-type
//!   triplex verify --input pred.json --output verified.json
//!
//! Input files that do not exist as given are looked up by file name under
//! the corpus directory.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use triplex_core::io::{load_rows, resolve_input};
use triplex_core::{AppConfig, LoggingConfig};
use triplex_eval::{
    create_embedding_client, EntityEvaluator, EntityMode, TripleEvalOptions, TripleEvaluator,
};
use triplex_extractor::{
    create_llm_client, write_predictions, write_verification, ExtractorSettings, SelfVerifier,
    TripleExtractor,
};
use triplex_retrieval::{FewShotRetrieval, IndexKind, ShotSelector};

#[derive(Parser)]
#[command(name = "triplex")]
#[command(about = "Few-shot retrieval and LLM triple extraction")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still apply)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Corpus and index locations, overriding the configuration
#[derive(Args)]
struct PathArgs {
    /// Annotated corpus (JSON array or JSON Lines)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Directory holding the index files
    #[arg(long)]
    index_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the coarse-type and relationship indexes
    BuildIndex {
        #[command(flatten)]
        paths: PathArgs,
    },
    /// Retrieve examples for one coarse type or relationship
    Retrieve {
        #[command(flatten)]
        paths: PathArgs,

        /// Coarse entity type to look up
        #[arg(long, conflicts_with = "schema", required_unless_present = "schema")]
        coarse_type: Option<String>,

        /// Relationship to look up
        #[arg(long)]
        schema: Option<String>,

        /// Number of examples
        #[arg(short)]
        k: Option<usize>,

        /// Sampling seed
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Select the few-shot examples for a target sentence
    Shots {
        #[command(flatten)]
        paths: PathArgs,

        /// Comma-separated coarse types
        #[arg(long, value_delimiter = ',')]
        coarse_types: Vec<String>,

        /// Comma-separated relationships
        #[arg(long, value_delimiter = ',')]
        schema: Vec<String>,

        /// Number of shots
        #[arg(short)]
        n: Option<usize>,

        /// Candidates per coarse type / relationship
        #[arg(short)]
        k: Option<usize>,

        /// Sampling seed
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Extract triples with the configured LLM
    Extract {
        #[command(flatten)]
        paths: PathArgs,

        /// Rows to extract from
        #[arg(long)]
        input: PathBuf,

        /// Where to write predictions
        #[arg(long)]
        output: PathBuf,

        /// Prompt template name
        #[arg(long)]
        template: Option<String>,

        /// Only extract the first N rows
        #[arg(long)]
        max_examples: Option<usize>,
    },
    /// Score predictions against gold annotations
    Evaluate {
        /// Gold rows
        #[arg(long)]
        gold: PathBuf,

        /// Predicted rows
        #[arg(long)]
        pred: PathBuf,

        /// Match on names and relationship only
        #[arg(long)]
        loose: bool,

        /// Break scores down by coarse type
        #[arg(long)]
        by_type: bool,

        /// Judge fine types by embedding similarity
        #[arg(long, conflicts_with = "loose")]
        semantic: bool,

        /// Score entities instead of triples (strict, medium or loose)
        #[arg(long)]
        entities: Option<EntityMode>,

        /// Write per-row entity errors here
        #[arg(long, requires = "entities")]
        errors: Option<PathBuf>,
    },
    /// Ask the configured LLM to confirm each annotated entity's type
    Verify {
        #[command(flatten)]
        paths: PathArgs,

        /// Rows whose entities are checked
        #[arg(long)]
        input: PathBuf,

        /// Where to write verification records
        #[arg(long)]
        output: PathBuf,

        /// Only verify the first N rows
        #[arg(long)]
        max_examples: Option<usize>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve an input file, searching the corpus directory when `path` is
/// not an existing file
fn locate(path: &Path, config: &AppConfig) -> anyhow::Result<PathBuf> {
    let root = config
        .paths
        .data_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok(resolve_input(path, root)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl PathArgs {
    fn apply(self, config: &mut AppConfig) {
        if let Some(data) = self.data {
            config.paths.data_path = data;
        }
        if let Some(dir) = self.index_dir {
            config.paths.index_dir = dir;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);
    tracing::debug!("Configuration loaded (llm provider {:?})", config.llm.provider);

    match cli.command {
        Commands::BuildIndex { paths } => {
            paths.apply(&mut config);
            let mut retrieval = FewShotRetrieval::from_config(&config.paths);
            let (coarse, relationship) = retrieval.build_indexes()?;
            print_json(&json!({
                "coarse_index": coarse,
                "relationship_index": relationship,
                "meta": retrieval.meta()?,
            }))?;
        }
        Commands::Retrieve {
            paths,
            coarse_type,
            schema,
            k,
            seed,
        } => {
            paths.apply(&mut config);
            let (kind, label) = match (coarse_type, schema) {
                (Some(label), _) => (IndexKind::Coarse, label),
                (None, Some(label)) => (IndexKind::Relationship, label),
                (None, None) => bail!("pass --coarse-type or --schema"),
            };

            let retrieval = FewShotRetrieval::from_config(&config.paths);
            let shots = retrieval.retrieve(
                kind,
                &label,
                k.unwrap_or(config.retrieval.per_query_k),
                seed.unwrap_or(config.retrieval.seed),
            )?;

            let results: Vec<_> = shots
                .iter()
                .map(|shot| json!({"position": shot.position, "example": shot.row}))
                .collect();
            print_json(&results)?;
        }
        Commands::Shots {
            paths,
            coarse_types,
            schema,
            n,
            k,
            seed,
        } => {
            paths.apply(&mut config);
            let retrieval = FewShotRetrieval::from_config(&config.paths);
            let selected = ShotSelector::new(&retrieval)
                .with_per_query_k(k.unwrap_or(config.retrieval.per_query_k))
                .with_seed(seed.unwrap_or(config.retrieval.seed))
                .select(&coarse_types, &schema, n.unwrap_or(config.retrieval.num_shots))?;
            print_json(&selected)?;
        }
        Commands::Extract {
            paths,
            input,
            output,
            template,
            max_examples,
        } => {
            paths.apply(&mut config);
            if let Some(template) = template {
                config.extraction.template = template;
            }

            let input = locate(&input, &config)?;
            let rows = load_rows(&input, max_examples.or(config.extraction.max_examples))
                .with_context(|| format!("loading {}", input.display()))?;
            let client = create_llm_client(&config.llm)?;
            let extractor = TripleExtractor::new(client, FewShotRetrieval::from_config(&config.paths))
                .with_settings(ExtractorSettings::from_config(&config));

            let predictions = extractor.extract_all(&rows).await?;
            write_predictions(&output, &predictions)?;

            let with_triples = predictions.iter().filter(|p| !p.output.is_empty()).count();
            print_json(&json!({
                "input": input,
                "output": output,
                "rows": predictions.len(),
                "rows_with_triples": with_triples,
            }))?;
        }
        Commands::Evaluate {
            gold,
            pred,
            loose,
            by_type,
            semantic,
            entities,
            errors,
        } => {
            let gold = locate(&gold, &config)?;
            let pred = locate(&pred, &config)?;
            let gold_rows =
                load_rows(&gold, None).with_context(|| format!("loading {}", gold.display()))?;
            let pred_rows =
                load_rows(&pred, None).with_context(|| format!("loading {}", pred.display()))?;

            if let Some(mode) = entities {
                let result = EntityEvaluator::new(mode).evaluate(&gold_rows, &pred_rows);
                if let Some(path) = errors {
                    result.errors.write(&path)?;
                }
                print_json(&result.report)?;
                return Ok(());
            }

            let mut options = TripleEvalOptions::from_config(&config.evaluation);
            options.strict = options.strict && !loose;
            options.by_type = options.by_type || by_type;
            options.strict_semantic = options.strict_semantic || semantic;

            let report = if options.strict && options.strict_semantic {
                let embedder =
                    create_embedding_client(&config.evaluation, config.llm.api_key.as_deref());
                TripleEvaluator::new(options)
                    .with_embedder(embedder.as_ref())
                    .evaluate(&gold_rows, &pred_rows)
                    .await?
            } else {
                TripleEvaluator::new(options).evaluate_exact(&gold_rows, &pred_rows)
            };
            print_json(&report)?;
        }
        Commands::Verify {
            paths,
            input,
            output,
            max_examples,
        } => {
            paths.apply(&mut config);
            let input = locate(&input, &config)?;
            let rows = load_rows(&input, max_examples.or(config.extraction.max_examples))
                .with_context(|| format!("loading {}", input.display()))?;

            let verifier = SelfVerifier::new(create_llm_client(&config.llm)?)
                .with_concurrency(config.extraction.concurrency);
            let records = verifier.verify_all(&rows).await?;
            write_verification(&output, &records)?;

            let (checked, kept) = records.iter().fold((0, 0), |(checked, kept), r| {
                (checked + r.verification.len(), kept + r.verified_entities.len())
            });
            print_json(&json!({
                "input": input,
                "output": output,
                "rows": records.len(),
                "entities_checked": checked,
                "entities_verified": kept,
            }))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_shots() {
        let cli = Cli::try_parse_from([
            "triplex", "shots", "--coarse-types", "person,location", "--schema", "国籍", "-n", "4",
        ])
        .unwrap();

        match cli.command {
            Commands::Shots {
                coarse_types,
                schema,
                n,
                k,
                ..
            } => {
                assert_eq!(coarse_types, vec!["person", "location"]);
                assert_eq!(schema, vec!["国籍"]);
                assert_eq!(n, Some(4));
                assert_eq!(k, None);
            }
            _ => panic!("expected shots"),
        }
    }

    #[test]
    fn test_retrieve_needs_one_label() {
        assert!(Cli::try_parse_from(["triplex", "retrieve"]).is_err());
        assert!(Cli::try_parse_from([
            "triplex", "retrieve", "--coarse-type", "person", "--schema", "国籍"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["triplex", "retrieve", "--schema", "国籍", "-k", "2"]).is_ok());
    }

    #[test]
    fn test_evaluate_flags() {
        let cli = Cli::try_parse_from([
            "triplex", "evaluate", "--gold", "g.json", "--pred", "p.json", "--entities", "medium",
            "--errors", "e.json",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Evaluate {
                entities: Some(EntityMode::Medium),
                ..
            }
        ));

        assert!(Cli::try_parse_from([
            "triplex", "evaluate", "--gold", "g", "--pred", "p", "--errors", "e.json"
        ])
        .is_err());
        assert!(Cli::try_parse_from([
            "triplex", "evaluate", "--gold", "g", "--pred", "p", "--loose", "--semantic"
        ])
        .is_err());
    }

    #[test]
    fn test_parse_verify() {
        let cli = Cli::try_parse_from([
            "triplex", "verify", "--input", "pred.json", "--output", "verified.json",
            "--max-examples", "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Verify {
                input,
                max_examples,
                ..
            } => {
                assert_eq!(input, PathBuf::from("pred.json"));
                assert_eq!(max_examples, Some(10));
            }
            _ => panic!("expected verify"),
        }

        assert!(Cli::try_parse_from(["triplex", "verify", "--input", "pred.json"]).is_err());
    }

    #[test]
    fn test_locate_searches_corpus_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("splits");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("dev2.json"), "[]").unwrap();

        let mut config = AppConfig::default();
        config.paths.data_path = dir.path().join("train.json");

        assert_eq!(
            locate(Path::new("dev2.json"), &config).unwrap(),
            nested.join("dev2.json")
        );
        assert!(locate(Path::new("test2.json"), &config).is_err());
    }

    #[test]
    fn test_path_overrides() {
        let mut config = AppConfig::default();
        PathArgs {
            data: Some("corpus.jsonl".into()),
            index_dir: None,
        }
        .apply(&mut config);

        assert_eq!(config.paths.data_path, PathBuf::from("corpus.jsonl"));
        assert_eq!(config.paths.index_dir, AppConfig::default().paths.index_dir);
    }
}
