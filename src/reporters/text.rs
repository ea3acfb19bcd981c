//! YAML-like text rendering of a report

use super::AnalysisReport;
use crate::core::Registry;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use std::io::Write;

/// Render `report`; leaf blobs are decoded with the registered leaves
pub fn render_text(report: &AnalysisReport, registry: &Registry, sink: &mut dyn Write) -> Result<()> {
    let header = &report.header;
    writeln!(sink, "lineage:")?;
    writeln!(sink, "  version: {}", header.version)?;
    writeln!(sink, "  hash: {}", header.hash)?;
    writeln!(sink, "  repository: {}", header.repository)?;
    writeln!(sink, "  begin_unix_time: {}", header.begin_unix_time)?;
    writeln!(sink, "  end_unix_time: {}", header.end_unix_time)?;
    writeln!(sink, "  begin: {}", format_time(header.begin_unix_time))?;
    writeln!(sink, "  end: {}", format_time(header.end_unix_time))?;
    writeln!(sink, "  commits: {}", header.commits)?;
    writeln!(sink, "  run_time: {}", header.run_time_ms)?;
    if !header.run_time_per_item_ms.is_empty() {
        writeln!(sink, "  run_time_per_item:")?;
        for (item, ms) in &header.run_time_per_item_ms {
            writeln!(sink, "    {}: {}", item, ms)?;
        }
    }

    for (name, blob) in &report.contents {
        writeln!(sink, "{}:", name)?;
        let leaf = registry
            .lookup(name)
            .into_iter()
            .find_map(|r| r.prototype().as_leaf());
        let Some(leaf) = leaf else {
            writeln!(sink, "  # {} bytes of an unknown analysis", blob.len())?;
            continue;
        };
        let result = leaf
            .deserialize(blob)
            .with_context(|| format!("Failed to decode {}", name))?;
        let mut body = Vec::new();
        leaf.serialize(&result, false, &mut body)?;
        for line in String::from_utf8_lossy(&body).lines() {
            if line.is_empty() {
                writeln!(sink)?;
            } else {
                writeln!(sink, "  {}", line)?;
            }
        }
    }
    Ok(())
}

/// Format a unix timestamp as RFC 3339
fn format_time(seconds: i64) -> String {
    match Utc.timestamp_opt(seconds, 0).single() {
        Some(dt) => dt.to_rfc3339(),
        None => "1970-01-01T00:00:00+00:00".to_string(),
    }
}
