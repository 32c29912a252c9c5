//! Corpus and JSON file I/O
//!
//! Datasets arrive either as a JSON array or as JSON Lines; the format is
//! detected from the first non-whitespace character. Outputs are written
//! through a temporary file in the target directory and renamed into place.

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::{ExampleRow, Result, TriplexError};

/// Load a JSON array or JSONL file into raw values
pub fn load_json_or_jsonl(path: &Path) -> Result<Vec<Value>> {
    let content = fs::read_to_string(path).map_err(|e| TriplexError::io(path, e))?;
    parse_json_or_jsonl(&content).map_err(|message| TriplexError::Parse {
        context: path.display().to_string(),
        message,
    })
}

/// Parse JSON array or JSONL text
pub fn parse_json_or_jsonl(content: &str) -> std::result::Result<Vec<Value>, String> {
    let trimmed = content.trim_start();

    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| e.to_string());
    }

    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| serde_json::from_str(line).map_err(|e| format!("line {}: {e}", n + 1)))
        .collect()
}

/// Load example rows, optionally truncated to the first `max_examples`
pub fn load_rows(path: &Path, max_examples: Option<usize>) -> Result<Vec<ExampleRow>> {
    let values = load_json_or_jsonl(path)?;
    let limit = max_examples.unwrap_or(values.len());

    Ok(values
        .iter()
        .take(limit)
        .map(ExampleRow::from_value)
        .collect())
}

/// SHA-256 of a file's content as lowercase hex
pub fn file_sha256(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| TriplexError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf).map_err(|e| TriplexError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of an in-memory byte string as lowercase hex
pub fn bytes_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Create a directory and its parents
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| TriplexError::io(path, e))
}

/// Write a value as pretty JSON, replacing any existing file atomically
pub fn write_json_overwrite<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_dir(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| TriplexError::io(&dir, e))?;
    serde_json::to_writer_pretty(&mut tmp, value)
        .map_err(|e| TriplexError::parse(path.display().to_string(), e))?;
    tmp.write_all(b"\n").map_err(|e| TriplexError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| TriplexError::io(path, e.error))?;

    tracing::info!("Wrote {}", path.display());
    Ok(())
}

/// Recursively find the first file named `filename` under `root`
pub fn find_file(root: &Path, filename: &str) -> Result<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name() == filename)
        .map(|entry| entry.into_path())
        .ok_or_else(|| {
            TriplexError::NotFound(format!("{} under {}", filename, root.display()))
        })
}

/// Return `path` if it names an existing file, otherwise look for a file
/// with the same name anywhere under `search_root`
pub fn resolve_input(path: &Path, search_root: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| TriplexError::NotFound(path.display().to_string()))?;

    let found = find_file(search_root, filename)?;
    tracing::info!("Resolved {} to {}", path.display(), found.display());
    Ok(found)
}
