//! Output formatting for checkrun.
//!
//! Provides terminal, JSON, and JUnit XML output formatters over a
//! [`RunReport`]. The JSON and JUnit formatters are behind the `json` and
//! `junit` cargo features.
//!
//! All formatters produce valid output for any report, including an empty
//! one. No function in this module will panic.

#[cfg(feature = "json")]
use serde::Serialize;
use tracing::warn;

use crate::cli::args::OutputFormat;
use crate::engine::result::{ResultSummary, RunReport};
use crate::CheckState;

const RULE: &str = "--------------------------------------------------------------------------------";

/// Trait for output formatters
pub trait OutputFormatter {
    /// Format a run report into a string
    fn format(&self, report: &RunReport) -> String;
}

/// Terminal (human-readable) formatter
pub struct TerminalFormatter {
    color: bool,
    verbose: bool,
}

impl TerminalFormatter {
    pub fn new(color: bool, verbose: bool) -> Self {
        TerminalFormatter { color, verbose }
    }

    fn colorize(&self, text: &str, color_code: &str) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", color_code, text)
        } else {
            text.to_string()
        }
    }

    fn status(&self, state: CheckState) -> String {
        match state {
            CheckState::Passed => self.colorize("[ PASS ]", "32"),
            CheckState::Failed => self.colorize("[ FAIL ]", "31"),
            CheckState::Skipped => self.colorize("[ SKIP ]", "90"),
            CheckState::Error => self.colorize("[ ERROR ]", "31"),
            CheckState::Aborted => self.colorize("[ ABORTED ]", "33"),
        }
    }

    fn results_table(&self, report: &RunReport, output: &mut String) {
        let width = report
            .groups
            .iter()
            .map(|g| g.name.len())
            .max()
            .unwrap_or(0)
            .max("GROUP".len());

        output.push_str(&format!(
            "{:<width$}  {:>6}  {:>6}  {:>7}  {:>5}  {:>7}\n",
            "GROUP",
            "PASSED",
            "FAILED",
            "SKIPPED",
            "ERROR",
            "ABORTED",
            width = width
        ));
        for group in &report.groups {
            let s = &group.summary;
            output.push_str(&format!(
                "{:<width$}  {:>6}  {:>6}  {:>7}  {:>5}  {:>7}\n",
                group.name,
                s.passed,
                s.failed,
                s.skipped,
                s.error,
                s.aborted,
                width = width
            ));
        }
    }

    fn failed_logs(&self, report: &RunReport, output: &mut String) {
        for (id, logs) in report.failed_checks_logs() {
            let header = format!("| {} |", self.colorize(&format!("LOG ({})", id), "36"));
            let rule = "-".repeat(format!("| LOG ({}) |", id).chars().count());
            output.push_str(&format!("{}\n{}\n{}\n", rule, header, rule));
            if logs.is_empty() {
                output.push_str("Empty log output\n");
            } else {
                output.push_str(logs.trim_end());
                output.push('\n');
            }
        }
    }
}

impl OutputFormatter for TerminalFormatter {
    fn format(&self, report: &RunReport) -> String {
        let mut output = String::new();

        // Header
        output.push_str(RULE);
        output.push_str("\ncheckrun report\n");
        output.push_str(&format!("Label filter: {}\n", report.label_filter));
        output.push_str(&format!("Started: {}\n", report.started_at.to_rfc3339()));
        output.push_str(RULE);
        output.push_str("\n\n");

        for (group, record) in report.ordered_results() {
            let reason = if record.skip_reason.is_empty() || (record.state == CheckState::Failed && !self.verbose) {
                String::new()
            } else {
                format!(" ({})", record.skip_reason.lines().next().unwrap_or_default())
            };
            output.push_str(&format!(
                "  {} {}/{}{}\n",
                self.status(record.state),
                group.name,
                record.test_id.id,
                reason
            ));
            if self.verbose && !record.captured_test_output.is_empty() {
                for line in record.captured_test_output.lines() {
                    output.push_str(&format!("      {}\n", line));
                }
            }
        }
        output.push('\n');

        self.results_table(report, &mut output);
        output.push('\n');
        self.failed_logs(report, &mut output);

        // Summary
        let summary = report.summary();
        output.push_str(RULE);
        output.push('\n');
        output.push_str(&format!(
            "SUMMARY: {} passed, {} failed, {} skipped, {} error, {} aborted\n",
            summary.passed, summary.failed, summary.skipped, summary.error, summary.aborted
        ));
        output.push_str(&format!(
            "Total time: {:.1}s\n",
            report.duration_ms as f64 / 1000.0
        ));
        if let Some(reason) = &report.abort_reason {
            output.push_str(&format!("Run aborted: {}\n", reason));
        }
        for error in &report.errors {
            output.push_str(&format!("Error: {}\n", error));
        }
        output.push_str(RULE);

        output
    }
}

/// JSON formatter
#[cfg(feature = "json")]
pub struct JsonFormatter {
    pretty: bool,
}

#[cfg(feature = "json")]
#[derive(Serialize)]
struct JsonReport<'a> {
    summary: ResultSummary,
    #[serde(flatten)]
    report: &'a RunReport,
}

#[cfg(feature = "json")]
impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        JsonFormatter { pretty }
    }
}

#[cfg(feature = "json")]
impl OutputFormatter for JsonFormatter {
    fn format(&self, report: &RunReport) -> String {
        let doc = JsonReport {
            summary: report.summary(),
            report,
        };
        let rendered = if self.pretty {
            serde_json::to_string_pretty(&doc)
        } else {
            serde_json::to_string(&doc)
        };
        rendered.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }
}

/// JUnit XML formatter
#[cfg(feature = "junit")]
pub struct JunitFormatter;

#[cfg(feature = "junit")]
impl JunitFormatter {
    pub fn new() -> Self {
        JunitFormatter
    }

    fn escape_xml(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '&' => result.push_str("&amp;"),
                '<' => result.push_str("&lt;"),
                '>' => result.push_str("&gt;"),
                '"' => result.push_str("&quot;"),
                '\'' => result.push_str("&apos;"),
                c => result.push(c),
            }
        }
        result
    }
}

#[cfg(feature = "junit")]
impl Default for JunitFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "junit")]
impl OutputFormatter for JunitFormatter {
    fn format(&self, report: &RunReport) -> String {
        let mut output = String::new();
        output.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

        let summary = report.summary();
        output.push_str(&format!(
            "<testsuites tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{:.3}\">\n",
            summary.total,
            summary.failed,
            summary.error + summary.aborted,
            summary.skipped,
            report.duration_ms as f64 / 1000.0
        ));

        for group in &report.groups {
            let s = &group.summary;
            output.push_str(&format!(
                "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\">\n",
                Self::escape_xml(&group.name),
                s.total,
                s.failed,
                s.error + s.aborted,
                s.skipped
            ));

            for id in &group.check_ids {
                let Some(record) = report.results.get(id) else {
                    continue;
                };
                output.push_str(&format!(
                    "    <testcase name=\"{}\" classname=\"checkrun.{}\" time=\"{}\"",
                    Self::escape_xml(id),
                    Self::escape_xml(&group.name),
                    record.duration
                ));

                let reason = Self::escape_xml(&record.skip_reason);
                match record.state {
                    CheckState::Passed => output.push_str(" />\n"),
                    CheckState::Failed => output.push_str(&format!(
                        ">\n      <failure message=\"check failed\">{}</failure>\n    </testcase>\n",
                        reason
                    )),
                    CheckState::Skipped => output.push_str(&format!(
                        ">\n      <skipped message=\"{}\" />\n    </testcase>\n",
                        reason
                    )),
                    CheckState::Error => output.push_str(&format!(
                        ">\n      <error type=\"error\" message=\"{}\" />\n    </testcase>\n",
                        reason
                    )),
                    CheckState::Aborted => output.push_str(&format!(
                        ">\n      <error type=\"aborted\" message=\"{}\" />\n    </testcase>\n",
                        reason
                    )),
                }
            }

            output.push_str("  </testsuite>\n");
        }

        output.push_str("</testsuites>");
        output
    }
}

/// Get a formatter based on the output format
pub fn get_formatter(format: OutputFormat, no_color: bool, verbose: bool) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Text => Box::new(TerminalFormatter::new(!no_color, verbose)),
        #[cfg(feature = "json")]
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        #[cfg(feature = "junit")]
        OutputFormat::Junit => Box::new(JunitFormatter::new()),
        #[allow(unreachable_patterns)]
        other => {
            warn!("{:?} output is not compiled in, falling back to text", other);
            Box::new(TerminalFormatter::new(!no_color, verbose))
        }
    }
}
