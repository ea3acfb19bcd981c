//! Persisted run output
//!
//! An [`AnalysisReport`] is a header plus one binary blob per leaf, each blob
//! being that leaf's own binary serialization. Two renderings exist:
//! - `binary` - the report itself, encoded with bitcode; input of `combine`
//! - `text`   - a YAML-like document: header block, then every leaf's text form

mod binary;
mod text;

pub use binary::{read_report, write_report};
pub use text::render_text;

use crate::core::RunSummary;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// Bumped whenever the report layout changes
pub const FORMAT_VERSION: u32 = 1;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Binary,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" | "yaml" => Ok(OutputFormat::Text),
            "binary" | "bin" | "pb" => Ok(OutputFormat::Binary),
            _ => Err(anyhow!("Unknown format '{}'. Valid formats: text, binary", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Binary => write!(f, "binary"),
        }
    }
}

/// Report header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: u32,
    /// SHA-256 over the leaf blobs, in name order
    pub hash: String,
    pub repository: String,
    pub begin_unix_time: i64,
    pub end_unix_time: i64,
    pub commits: u64,
    pub run_time_ms: u64,
    pub run_time_per_item_ms: BTreeMap<String, u64>,
}

impl Metadata {
    pub fn from_summary(repository: &str, summary: &RunSummary) -> Self {
        Self {
            version: FORMAT_VERSION,
            hash: String::new(),
            repository: repository.to_string(),
            begin_unix_time: summary.begin_time,
            end_unix_time: summary.end_time,
            commits: summary.commits,
            run_time_ms: summary.run_time.as_millis() as u64,
            run_time_per_item_ms: summary
                .run_time_per_item
                .iter()
                .map(|(item, elapsed)| (item.clone(), elapsed.as_millis() as u64))
                .collect(),
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            begin_time: self.begin_unix_time,
            end_time: self.end_unix_time,
            commits: self.commits,
            run_time: Duration::from_millis(self.run_time_ms),
            run_time_per_item: self
                .run_time_per_item_ms
                .iter()
                .map(|(item, ms)| (item.clone(), Duration::from_millis(*ms)))
                .collect(),
        }
    }
}

/// Header plus leaf name → leaf binary blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub header: Metadata,
    pub contents: BTreeMap<String, Vec<u8>>,
}

impl AnalysisReport {
    pub fn new(header: Metadata) -> Self {
        Self {
            header,
            contents: BTreeMap::new(),
        }
    }

    /// Recompute the content hash after `contents` changed
    pub fn seal(&mut self) {
        self.header.hash = content_hash(&self.contents);
    }

    /// Whether the stored hash matches the contents
    pub fn verify(&self) -> bool {
        self.header.hash == content_hash(&self.contents)
    }
}

fn content_hash(contents: &BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    for (name, blob) in contents {
        hasher.update(name.as_bytes());
        hasher.update((blob.len() as u64).to_le_bytes());
        hasher.update(blob);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("TEXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("bin".parse::<OutputFormat>().unwrap(), OutputFormat::Binary);
        assert!("html".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_header_summary_conversion() {
        let mut summary = RunSummary::new();
        summary.record_commit(100);
        summary.record_commit(300);
        summary.run_time = Duration::from_millis(1500);
        summary.record_item_time("Devs", Duration::from_millis(20));

        let header = Metadata::from_summary("repo", &summary);
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.summary(), summary);
    }

    #[test]
    fn test_seal_and_verify() {
        let mut report = AnalysisReport::new(Metadata::default());
        report.contents.insert("Devs".to_string(), vec![1, 2, 3]);
        assert!(!report.verify());
        report.seal();
        assert!(report.verify());
        report.contents.insert("Couples".to_string(), vec![]);
        assert!(!report.verify());
    }
}
