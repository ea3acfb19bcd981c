//! Binary report encoding (bitcode)

use super::{AnalysisReport, FORMAT_VERSION};
use anyhow::{bail, Context, Result};
use std::io::{Read, Write};

/// Encode `report` into `sink`
pub fn write_report(report: &AnalysisReport, sink: &mut dyn Write) -> Result<()> {
    let bytes = bitcode::serialize(report).context("Failed to encode report")?;
    sink.write_all(&bytes)?;
    Ok(())
}

/// Decode a report and check its version and content hash
pub fn read_report(source: &mut dyn Read) -> Result<AnalysisReport> {
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes)?;
    let report: AnalysisReport =
        bitcode::deserialize(&bytes).context("Not a lineage binary report")?;
    if report.header.version != FORMAT_VERSION {
        bail!(
            "Unsupported report version {} (expected {})",
            report.header.version,
            FORMAT_VERSION
        );
    }
    if !report.verify() {
        bail!("Report contents do not match the header hash");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::super::Metadata;
    use super::*;

    fn sample() -> AnalysisReport {
        let mut report = AnalysisReport::new(Metadata {
            version: FORMAT_VERSION,
            repository: "repo".to_string(),
            commits: 3,
            ..Default::default()
        });
        report.contents.insert("Devs".to_string(), vec![7; 16]);
        report.seal();
        report
    }

    #[test]
    fn test_roundtrip() -> Result<()> {
        let report = sample();
        let mut buffer = Vec::new();
        write_report(&report, &mut buffer)?;
        let decoded = read_report(&mut buffer.as_slice())?;
        assert_eq!(decoded, report);
        Ok(())
    }

    #[test]
    fn test_tampered_report_is_rejected() -> Result<()> {
        let mut report = sample();
        report.contents.insert("Devs".to_string(), vec![8; 16]);
        let mut buffer = Vec::new();
        write_report(&report, &mut buffer)?;
        assert!(read_report(&mut buffer.as_slice()).is_err());
        assert!(read_report(&mut &b"garbage"[..]).is_err());
        Ok(())
    }
}
