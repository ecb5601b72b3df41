//! Markdown run summary.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::combination::Combination;
use crate::orchestrate::RunReport;
use crate::plan::SkipCounts;

const SUMMARY_TEMPLATE: &str = include_str!("templates/summary.md");

#[derive(Debug, Serialize)]
struct FailedView<'a> {
    combination: &'a Combination,
    message: String,
}

#[derive(Debug, Serialize)]
struct ReportView<'a> {
    verified: &'a [Combination],
    failed: Vec<FailedView<'a>>,
    skipped: SkipCounts,
    deferred: usize,
    cancelled: bool,
}

impl<'a> ReportView<'a> {
    fn new(report: &'a RunReport) -> Self {
        Self {
            verified: &report.verified,
            failed: report
                .failed
                .iter()
                .map(|failed| FailedView {
                    combination: &failed.combination,
                    message: failed.reason.to_string(),
                })
                .collect(),
            skipped: report.skipped,
            deferred: report.deferred,
            cancelled: report.cancelled,
        }
    }
}

/// Render the summary for a run in `mode` (`release` or `snapshot`).
pub fn render_summary(mode: &str, report: &RunReport, finished_at: DateTime<Utc>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("summary", SUMMARY_TEMPLATE)
        .context("load summary template")?;
    let template = env.get_template("summary")?;
    let rendered = template
        .render(context! {
            mode => mode,
            finished_at => finished_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            report => ReportView::new(report),
        })
        .context("render summary")?;
    Ok(rendered)
}

/// Append the rendered summary to a step-summary file (e.g. `$GITHUB_STEP_SUMMARY`).
pub fn append_summary(path: &Path, summary: &str) -> Result<()> {
    debug!(path = %path.display(), "appending run summary");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(summary.as_bytes())
        .with_context(|| format!("append to {}", path.display()))?;
    if !summary.ends_with('\n') {
        file.write_all(b"\n")
            .with_context(|| format!("append to {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FailureReason;
    use crate::orchestrate::FailedPair;

    fn finished_at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp")
    }

    fn sample_report() -> RunReport {
        RunReport {
            verified: vec![Combination::new("1.0.Final", "1.0.Final")],
            failed: vec![FailedPair {
                combination: Combination::new("2.0.Final", "1.0.Final"),
                reason: FailureReason::BuildFailed { exit_code: Some(1) },
            }],
            skipped: SkipCounts {
                broken: 2,
                verified: 5,
                failed: 0,
                ignored: 1,
            },
            deferred: 3,
            cancelled: false,
        }
    }

    #[test]
    fn summary_lists_counts_and_failed_pairs() {
        let summary = render_summary("release", &sample_report(), finished_at()).expect("render");
        assert!(summary.starts_with("## Compatibility run: release"));
        assert!(summary.contains("Finished at 2023-11-14T22:13:20Z"));
        assert!(summary.contains("| Newly verified | 1 |"));
        assert!(summary.contains("| Newly failed | 1 |"));
        assert!(summary.contains("| Skipped as verified | 5 |"));
        assert!(summary.contains("| Deferred | 3 |"));
        assert!(summary.contains(
            "- cli `2.0.Final` with platform `1.0.Final`: build failed with exit code 1"
        ));
        assert!(!summary.contains("cancelled"));
    }

    #[test]
    fn cancelled_run_is_called_out() {
        let report = RunReport {
            cancelled: true,
            ..RunReport::default()
        };
        let summary = render_summary("snapshot", &report, finished_at()).expect("render");
        assert!(summary.contains("Run was cancelled"));
        assert!(!summary.contains("### Failed pairs"));
    }

    #[test]
    fn append_keeps_existing_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("step_summary.md");
        std::fs::write(&path, "# Earlier step\n").expect("seed");
        append_summary(&path, "## Compatibility run").expect("append");
        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "# Earlier step\n## Compatibility run\n");
    }
}
