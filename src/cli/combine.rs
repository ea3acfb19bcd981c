//! Combine command - merge binary reports of separate runs

use super::run::write_output;
use anyhow::{bail, Result};
use console::style;
use lineage::core::{combine_reports, load_reports};
use lineage::reporters::OutputFormat;
use std::path::{Path, PathBuf};
use tracing::info;

pub(super) fn run(files: &[PathBuf], only: Option<&str>, output: Option<&Path>) -> Result<()> {
    let registry = lineage::builtin_registry();

    let (reports, mut failures) = load_reports(files);
    info!("Loaded {} of {} reports", reports.len(), files.len());
    let combined = combine_reports(&registry, &reports, only);
    failures.extend(combined.failures);

    if !failures.is_empty() {
        eprintln!("{}", style("Problems while combining:").yellow().bold());
        for failure in &failures {
            eprintln!("  {} {}: {:#}", style("✗").red(), failure.subject, failure.error);
        }
    }
    if reports.is_empty() {
        bail!("None of the {} input files could be read", files.len());
    }

    write_output(&combined.report, &registry, OutputFormat::Binary, output)?;
    eprintln!(
        "{} Combined {} reports: {} analyses, {} commits",
        style("✓").green().bold(),
        reports.len(),
        combined.report.contents.len(),
        combined.report.header.commits
    );
    Ok(())
}
