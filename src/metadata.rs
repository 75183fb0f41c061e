//! Metadata manifest reader
//!
//! A metadata file lists one record per line with whitespace-separated
//! fields. The first field names the audio file; the remaining fields
//! (labels, speaker ids, ...) are ignored here. Lines with fewer than two
//! fields are treated as malformed and skipped.
//!
//! The order of the returned entries becomes the row order of every layer
//! matrix written at the end of a run, so it is an explicit choice.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};

/// Ordering applied to metadata entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrder {
    /// Keep the line order of the metadata file
    #[default]
    Preserve,
    /// Sort entries lexicographically
    Sorted,
}

/// Counts gathered while reading a metadata file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSummary {
    pub total_lines: usize,
    pub kept: usize,
    pub skipped_lines: usize,
    pub duplicates: usize,
}

/// Read a metadata file and return the file identifier of each valid line
///
/// # Errors
/// * `FileNotFound` - If the path does not exist
/// * `InvalidMetadata` - If the file is not valid UTF-8 text
/// * `Io` - For any other read failure
pub fn read_metadata(path: &Path, order: EntryOrder) -> Result<Vec<String>> {
    let text = read_text(path)?;
    Ok(parse_metadata(&text, order))
}

/// Parse metadata text into file identifiers
pub fn parse_metadata(text: &str, order: EntryOrder) -> Vec<String> {
    let mut entries = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        match first_token(line) {
            Some(token) => entries.push(token.to_string()),
            None => {
                if !line.trim().is_empty() {
                    debug!("Skipping malformed metadata line {}: {:?}", line_no + 1, line);
                }
            }
        }
    }

    if order == EntryOrder::Sorted {
        entries.sort();
    }

    entries
}

/// Summarize a metadata file without keeping the entries
pub fn summarize_metadata(path: &Path) -> Result<MetadataSummary> {
    let text = read_text(path)?;
    let mut summary = MetadataSummary::default();
    let mut seen = HashSet::new();

    for line in text.lines() {
        summary.total_lines += 1;
        match first_token(line) {
            Some(token) => {
                summary.kept += 1;
                if !seen.insert(token) {
                    summary.duplicates += 1;
                }
            }
            None => summary.skipped_lines += 1,
        }
    }

    Ok(summary)
}

/// First field of a line holding at least two fields
fn first_token(line: &str) -> Option<&str> {
    let mut fields = line.split_whitespace();
    let first = fields.next()?;
    fields.next().map(|_| first)
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ExtractError::FileNotFound {
            path: path.display().to_string(),
            source: Some(e),
        },
        ErrorKind::InvalidData => ExtractError::InvalidMetadata {
            path: path.display().to_string(),
            reason: "file is not valid UTF-8 text".to_string(),
        },
        _ => ExtractError::Io(e),
    })
}
