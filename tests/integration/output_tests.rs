//! Output formatting integration tests.
//!
//! Formats reports of real mock runs in every format.

use std::time::Duration;

use checkrun::cli::args::OutputFormat;
use checkrun::cli::output::{get_formatter, JsonFormatter, JunitFormatter, OutputFormatter, TerminalFormatter};
use checkrun::engine::labels::LabelsExpr;
use checkrun::RunReport;

use crate::mocks::*;

fn mixed_report() -> RunReport {
    let orchestrator = mock_orchestrator(vec![
        (
            "networking",
            vec![passing_check("dns", &["common"]), failing_check("mtu", &["common"])],
        ),
        (
            "platform",
            vec![
                erroring_check("kernel", &["common"]),
                passing_check("sysctl", &["common"]),
                passing_check("hugepages", &["telco"]),
            ],
        ),
    ]);
    orchestrator
        .run(&LabelsExpr::parse("common").unwrap(), Duration::from_secs(60))
        .unwrap()
}

#[test]
fn test_terminal_output_lists_every_check() {
    let output = TerminalFormatter::new(false, false).format(&mixed_report());

    assert!(output.contains("[ PASS ] networking/mock-dns"));
    assert!(output.contains("[ FAIL ] networking/mock-mtu"));
    assert!(output.contains("[ ERROR ] platform/mock-kernel"));
    assert!(output.contains("[ SKIP ] platform/mock-sysctl (group platform check mock-kernel function unexpected error)"));
    assert!(output.contains("[ SKIP ] platform/mock-hugepages (not matching labels)"));
    assert!(output.contains("SUMMARY: 1 passed, 1 failed, 2 skipped, 1 error, 0 aborted"));
    assert!(output.contains("Error: group platform check mock-kernel function unexpected error"));
}

#[test]
fn test_terminal_output_shows_failed_logs() {
    let output = TerminalFormatter::new(false, false).format(&mixed_report());
    assert!(output.contains("| LOG (mock-mtu) |"));
    assert!(output.contains("found a non-compliant object"));
    assert!(!output.contains("| LOG (mock-dns) |"));
}

#[test]
fn test_terminal_output_without_color_has_no_escapes() {
    let output = TerminalFormatter::new(false, true).format(&mixed_report());
    assert!(!output.contains("\x1b["));
    let colored = TerminalFormatter::new(true, false).format(&mixed_report());
    assert!(colored.contains("\x1b[32m[ PASS ]\x1b[0m"));
}

#[test]
fn test_json_output_is_keyed_by_check_id() {
    let output = JsonFormatter::new(false).format(&mixed_report());
    let value: serde_json::Value = serde_json::from_str(&output).unwrap();

    assert_eq!(value["summary"]["passed"], 1);
    assert_eq!(value["summary"]["error"], 1);
    assert_eq!(value["results"]["mock-mtu"]["state"], "failed");
    assert_eq!(value["results"]["mock-dns"]["test_id"]["suite"], "mock");
    assert_eq!(value["groups"][1]["name"], "platform");
    assert_eq!(value["errors"].as_array().unwrap().len(), 1);
}

#[test]
fn test_junit_output_has_one_suite_per_group() {
    let output = JunitFormatter::new().format(&mixed_report());

    assert!(output.starts_with("<?xml"));
    assert_eq!(output.matches("<testsuite ").count(), 2);
    assert!(output.contains("<testsuite name=\"networking\" tests=\"2\" failures=\"1\""));
    assert!(output.contains("<testcase name=\"mock-mtu\" classname=\"checkrun.networking\""));
    assert!(output.contains("<skipped message=\"not matching labels\" />"));
    assert!(output.contains("<error type=\"error\""));
    assert!(output.ends_with("</testsuites>"));
}

#[test]
fn test_get_formatter_by_format() {
    let report = mixed_report();
    let json = get_formatter(OutputFormat::Json, true, false).format(&report);
    assert!(json.trim_start().starts_with('{'));
    let junit = get_formatter(OutputFormat::Junit, true, false).format(&report);
    assert!(junit.starts_with("<?xml"));
    let text = get_formatter(OutputFormat::Text, true, false).format(&report);
    assert!(text.contains("checkrun report"));
}
