//! Reporter.
//!
//! Renders a finished [`SuiteReport`] and decides the process exit status.

use crate::compare::Verdict;
use crate::suite::SuiteReport;
use clap::ValueEnum;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Every case passed.
pub const EXIT_PASSED: i32 = 0;
/// At least one case failed.
pub const EXIT_FAILED: i32 = 1;
/// The harness itself could not run (bad configuration, unreadable case file).
pub const EXIT_HARNESS_FAULT: i32 = 2;

pub const BANNER_START: &str = "BLACK-BOX TESTS START";
pub const BANNER_END: &str = "BLACK-BOX TESTS END";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with failure diagnostics
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

/// Exit status for a finished run: 0 only if every verdict passed.
pub fn exit_code(report: &SuiteReport) -> i32 {
    if report.summary().all_passed() {
        EXIT_PASSED
    } else {
        EXIT_FAILED
    }
}

/// Write `report` to `out` in the chosen format.
pub fn render<W: Write>(
    report: &SuiteReport,
    format: OutputFormat,
    verbose: bool,
    out: &mut W,
) -> io::Result<()> {
    match format {
        OutputFormat::Human => out.write_all(format_human(report, verbose).as_bytes()),
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &json_document(report))?;
            writeln!(out)
        }
        OutputFormat::Junit => out.write_all(format_junit_xml(report).as_bytes()),
    }
}

fn format_human(report: &SuiteReport, verbose: bool) -> String {
    let summary = report.summary();
    let mut text = String::new();
    let _ = writeln!(text, "{BANNER_START}");

    if verbose {
        for verdict in report.verdicts.iter().filter(|v| v.passed) {
            let _ = writeln!(
                text,
                "  ✓ #{} {} ({:.2?})",
                verdict.case_index,
                verdict.label(),
                verdict.duration
            );
        }
    }
    for verdict in &summary.failures {
        write_failure(&mut text, verdict);
    }

    let _ = writeln!(text, "{BANNER_END}");
    let _ = writeln!(text, "{}/{} passed", summary.passed, summary.total());
    if summary.all_passed() {
        let _ = writeln!(text, "All tests have passed successfully.");
    } else {
        let _ = writeln!(text, "FAILED: {} case(s) failed.", summary.failed);
    }
    text
}

fn write_failure(text: &mut String, verdict: &Verdict) {
    let _ = writeln!(
        text,
        "  ✗ #{} {} ({:.2?})",
        verdict.case_index,
        verdict.label(),
        verdict.duration
    );
    if let Some(failure) = &verdict.failure {
        let _ = writeln!(text, "    reason:          {failure}");
    }
    let _ = writeln!(text, "    source code:     {:?}", verdict.source_code);
    let _ = writeln!(text, "    expected output: {:?}", verdict.expected_output);
    let _ = writeln!(text, "    actual output:   {:?}", verdict.actual_output);
    if !verdict.stderr.is_empty() {
        let _ = writeln!(text, "    stderr:          {:?}", verdict.stderr);
    }
}

fn json_document(report: &SuiteReport) -> serde_json::Value {
    let summary = report.summary();
    serde_json::json!({
        "started_at": report.started_at.to_rfc3339(),
        "elapsed": report.elapsed.as_secs_f64(),
        "passed": summary.passed,
        "failed": summary.failed,
        "total": summary.total(),
        "verdicts": report.verdicts,
    })
}

/// Format a report as JUnit XML, one testcase per verdict.
fn format_junit_xml(report: &SuiteReport) -> String {
    let summary = report.summary();
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let _ = writeln!(
        xml,
        "<testsuites tests=\"{}\" failures=\"{}\" time=\"{:.3}\">",
        summary.total(),
        summary.failed,
        report.elapsed.as_secs_f64()
    );
    let _ = writeln!(
        xml,
        "  <testsuite name=\"blackbox\" tests=\"{}\" failures=\"{}\" time=\"{:.3}\" timestamp=\"{}\">",
        summary.total(),
        summary.failed,
        report.elapsed.as_secs_f64(),
        report.started_at.format("%Y-%m-%dT%H:%M:%S")
    );

    for verdict in &report.verdicts {
        let _ = writeln!(
            xml,
            "    <testcase name=\"{}\" classname=\"blackbox.case{}\" time=\"{:.3}\">",
            escape_xml(verdict.label()),
            verdict.case_index,
            verdict.duration.as_secs_f64()
        );

        if !verdict.passed {
            let message = verdict
                .failure
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_else(|| "case failed".to_string());
            let _ = writeln!(xml, "      <failure message=\"{}\">", escape_xml(&message));
            let _ = writeln!(
                xml,
                "source code: {}\nexpected output: {}\nactual output: {}",
                escape_xml(&verdict.source_code),
                escape_xml(&verdict.expected_output),
                escape_xml(&verdict.actual_output)
            );
            xml.push_str("      </failure>\n");
        }

        if !verdict.stderr.is_empty() {
            let _ = writeln!(
                xml,
                "      <system-err>{}</system-err>",
                escape_xml(&verdict.stderr)
            );
        }

        xml.push_str("    </testcase>\n");
    }

    xml.push_str("  </testsuite>\n");
    xml.push_str("</testsuites>\n");
    xml
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
