//! Corpus store
//!
//! Holds the annotated example rows in file order. A row's position in
//! `rows` is the key stored in the inverted indexes, so a corpus is never
//! reordered or edited after it is loaded.

use std::path::{Path, PathBuf};

use triplex_core::io::{bytes_sha256, file_sha256, load_rows};
use triplex_core::{ExampleRow, Result, TriplexError};

/// In-memory annotated corpus
#[derive(Debug, Clone)]
pub struct Corpus {
    source: PathBuf,
    sha256: String,
    rows: Vec<ExampleRow>,
}

impl Corpus {
    /// Load a JSON or JSONL corpus file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let rows = load_rows(path, None)?;
        let sha256 = file_sha256(path)?;

        tracing::debug!("Loaded {} examples from {}", rows.len(), path.display());

        Ok(Self {
            source: path.to_path_buf(),
            sha256,
            rows,
        })
    }

    /// Wrap rows that did not come from a file
    ///
    /// The digest is taken over the rows' JSON serialization.
    pub fn from_rows(rows: Vec<ExampleRow>) -> Result<Self> {
        let bytes = serde_json::to_vec(&rows)
            .map_err(|e| TriplexError::parse("in-memory corpus", e))?;

        Ok(Self {
            source: PathBuf::from("<memory>"),
            sha256: bytes_sha256(&bytes),
            rows,
        })
    }

    /// Where the rows came from
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Content digest used for staleness auditing
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn rows(&self) -> &[ExampleRow] {
        &self.rows
    }

    /// Row at a corpus position
    pub fn get(&self, position: usize) -> Option<&ExampleRow> {
        self.rows.get(position)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_keeps_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        std::fs::write(
            &path,
            r#"[{"sentence": "first"}, 17, {"sentence": "third"}]"#,
        )
        .unwrap();

        let corpus = Corpus::load(&path).unwrap();
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.get(0).unwrap().sentence, "first");
        assert_eq!(corpus.get(1).unwrap().sentence, "");
        assert_eq!(corpus.get(2).unwrap().sentence, "third");
        assert_eq!(corpus.sha256().len(), 64);
    }

    #[test]
    fn test_from_rows_digest_is_stable() {
        let rows = vec![ExampleRow::new("a"), ExampleRow::new("b")];
        let a = Corpus::from_rows(rows.clone()).unwrap();
        let b = Corpus::from_rows(rows).unwrap();
        assert_eq!(a.sha256(), b.sha256());
        assert_eq!(a.source(), Path::new("<memory>"));
    }
}
