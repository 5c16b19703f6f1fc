//! Report emission for the CLI commands.
//!
//! `run` and `detect` produce engine report artifacts (`PipelineReport`,
//! `DetectReport`) that downstream tooling parses, so they honor the
//! `--report`/`--output` destination and the `--compact` layout. The `info`
//! and `validate` summaries are interactive and always go to stdout,
//! pretty-printed.

use destripe_rs::{DetectReport, PipelineReport};
use serde::Serialize;
use std::io::Write;

/// Destination and layout of a command's JSON artifact.
#[derive(Clone, Copy)]
pub struct ReportFormat<'a> {
    /// Output file; stdout when absent.
    pub path: Option<&'a str>,
    /// Single-line JSON instead of pretty-printed.
    pub compact: bool,
}

pub fn emit_pipeline_report(report: &PipelineReport, format: ReportFormat) -> Result<(), String> {
    deliver(&render(report, format.compact)?, format.path)
}

pub fn emit_detect_report(report: &DetectReport, format: ReportFormat) -> Result<(), String> {
    deliver(&render(report, format.compact)?, format.path)
}

/// Pretty-print an `info`/`validate` summary to stdout.
pub fn emit_summary<T: Serialize>(summary: &T) -> Result<(), String> {
    deliver(&render(summary, false)?, None)
}

fn render<T: Serialize>(report: &T, compact: bool) -> Result<String, String> {
    let rendered = if compact {
        serde_json::to_string(report)
    } else {
        serde_json::to_string_pretty(report)
    };
    rendered.map_err(|e| format!("report serialization failed: {}", e))
}

fn deliver(json: &str, path: Option<&str>) -> Result<(), String> {
    match path {
        Some(path) => std::fs::write(path, json)
            .map_err(|e| format!("failed to write report '{}': {}", path, e)),
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", json).map_err(|e| format!("failed to write to stdout: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_report() -> PipelineReport {
        PipelineReport::new(
            PathBuf::from("/tmp/session.destriped.bin"),
            PathBuf::from("/tmp/session.destriped.rms.bin"),
            10_000,
            6,
            3,
        )
    }

    #[test]
    fn test_render_compact_is_single_line() {
        let json = render(&sample_report(), true).unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains("\"samples_written\":10000"));
    }

    #[test]
    fn test_render_pretty_is_indented() {
        let json = render(&sample_report(), false).unwrap();
        assert!(json.contains("\n  \"samples_written\": 10000"));
    }

    #[test]
    fn test_deliver_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = sample_report();
        emit_pipeline_report(
            &report,
            ReportFormat {
                path: path.to_str(),
                compact: false,
            },
        )
        .unwrap();
        let back: PipelineReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.samples_written, 10_000);
        assert_eq!(back.id, report.id);
    }
}
