//! Result merge protocol
//!
//! Combines independently produced reports leaf by leaf. Each leaf result is
//! folded pairwise through the leaf's [`ResultMerger`](crate::core::ResultMerger)
//! together with the originating run summaries; headers merge through
//! [`RunSummary::merge`]. A failing leaf or file is reported and skipped, the
//! rest of the combination proceeds.

use crate::core::component::{AnalysisResult, Leaf};
use crate::core::registry::Registry;
use crate::core::summary::RunSummary;
use crate::error::EngineError;
use crate::reporters::{read_report, AnalysisReport, Metadata};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::{debug, warn};

/// A file or a leaf that could not be combined
#[derive(Debug)]
pub struct CombineFailure {
    /// File path or leaf name
    pub subject: String,
    pub error: anyhow::Error,
}

impl fmt::Display for CombineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.subject, self.error)
    }
}

pub struct Combined {
    pub report: AnalysisReport,
    pub failures: Vec<CombineFailure>,
}

/// Decode report files in parallel. Successful reports come back sorted by path.
pub fn load_reports(paths: &[PathBuf]) -> (Vec<(String, AnalysisReport)>, Vec<CombineFailure>) {
    let decoded: Vec<(String, Result<AnalysisReport>)> = paths
        .par_iter()
        .map(|path| {
            let name = path.display().to_string();
            let report = File::open(path)
                .with_context(|| format!("Failed to open {}", name))
                .and_then(|file| read_report(&mut BufReader::new(file)));
            (name, report)
        })
        .collect();

    let mut reports = Vec::with_capacity(decoded.len());
    let mut failures = Vec::new();
    for (name, report) in decoded {
        match report {
            Ok(report) => reports.push((name, report)),
            Err(error) => {
                warn!("Skipping {}: {:#}", name, error);
                failures.push(CombineFailure {
                    subject: name,
                    error,
                });
            }
        }
    }
    reports.sort_by(|a, b| a.0.cmp(&b.0));
    (reports, failures)
}

/// Merge `reports` in the given order, optionally restricted to one leaf
pub fn combine_reports(
    registry: &Registry,
    reports: &[(String, AnalysisReport)],
    only: Option<&str>,
) -> Combined {
    let mut summary = RunSummary::new();
    let mut repositories: Vec<&str> = Vec::new();
    for (_, report) in reports {
        summary.merge(&report.header.summary());
        if !repositories.contains(&report.header.repository.as_str()) {
            repositories.push(&report.header.repository);
        }
    }

    let mut combined = AnalysisReport::new(Metadata::from_summary(&repositories.join(" & "), &summary));
    let mut failures = Vec::new();

    let names: BTreeSet<&str> = reports
        .iter()
        .flat_map(|(_, report)| report.contents.keys().map(String::as_str))
        .filter(|name| only.map_or(true, |only| *name == only))
        .collect();
    if let (Some(only), true) = (only, names.is_empty()) {
        failures.push(CombineFailure {
            subject: only.to_string(),
            error: EngineError::UnknownComponent(only.to_string()).into(),
        });
    }

    for name in names {
        match merge_leaf(registry, name, reports) {
            Ok(blob) => {
                combined.contents.insert(name.to_string(), blob);
            }
            Err(error) => {
                warn!("Cannot combine {}: {:#}", name, error);
                failures.push(CombineFailure {
                    subject: name.to_string(),
                    error,
                });
            }
        }
    }

    combined.seal();
    debug!(
        "combined {} reports into {} leaves ({} failures)",
        reports.len(),
        combined.contents.len(),
        failures.len()
    );
    Combined {
        report: combined,
        failures,
    }
}

fn find_leaf<'r>(registry: &'r Registry, name: &str) -> Result<&'r dyn Leaf> {
    registry
        .lookup(name)
        .into_iter()
        .find_map(|r| r.prototype().as_leaf())
        .ok_or_else(|| EngineError::UnknownComponent(name.to_string()).into())
}

fn merge_leaf(
    registry: &Registry,
    name: &str,
    reports: &[(String, AnalysisReport)],
) -> Result<Vec<u8>> {
    let leaf = find_leaf(registry, name)?;
    let merger = leaf
        .as_result_merger()
        .ok_or_else(|| EngineError::IncompatibleResults {
            component: name.to_string(),
            reason: "results of this analysis cannot be merged".to_string(),
        })?;

    let mut acc: Option<(AnalysisResult, RunSummary)> = None;
    for (file, report) in reports {
        let Some(blob) = report.contents.get(name) else {
            continue;
        };
        let result = leaf
            .deserialize(blob)
            .with_context(|| format!("Failed to decode {} from {}", name, file))?;
        let summary = report.header.summary();
        acc = Some(match acc {
            None => (result, summary),
            Some((previous, previous_summary)) => {
                let merged = merger
                    .merge_results(&previous, &result, &previous_summary, &summary)
                    .with_context(|| format!("while merging {}", file))?;
                (merged, previous_summary.merged(&summary))
            }
        });
    }

    let (result, _) = acc.ok_or_else(|| EngineError::UnknownComponent(name.to_string()))?;
    let mut blob = Vec::new();
    leaf.serialize(&result, true, &mut blob)?;
    Ok(blob)
}
