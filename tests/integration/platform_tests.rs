//! Built-in platform check integration tests.
//!
//! Runs the kernel taint check through an orchestrator against fake
//! `/proc` and `/sys` trees.

use std::time::Duration;

use checkrun::checks::platform::TaintInspector;
use checkrun::checks::{catalog, load_platform_checks};
use checkrun::engine::labels::LabelsExpr;
use checkrun::{CheckState, Orchestrator, ResultRecord};

use crate::mocks::MockKernel;

const CHECK_ID: &str = "platform-alteration-tainted-node-kernel";

fn run_against(kernel: &MockKernel, allow_list: &[&str]) -> ResultRecord {
    let root = kernel.build();
    let allow_list: Vec<String> = allow_list.iter().map(|m| m.to_string()).collect();

    let orchestrator = Orchestrator::new(catalog());
    load_platform_checks(&orchestrator, TaintInspector::new(root.path(), &allow_list));

    let report = orchestrator
        .run(&LabelsExpr::parse("common").unwrap(), Duration::from_secs(60))
        .unwrap();
    report.results.get(CHECK_ID).cloned().unwrap()
}

#[test]
fn test_clean_kernel_passes() {
    let record = run_against(&MockKernel::default(), &[]);
    assert_eq!(record.state, CheckState::Passed);
    assert!(record.check_details.contains("Node has no non-approved kernel taints"));
    assert!(record.check_details.contains("worker-0"));
}

#[test]
fn test_tainted_kernel_without_allow_list() {
    let kernel = MockKernel::tainted(1 << 12).with_module("zfs", "O");
    let record = run_against(&kernel, &[]);
    assert_eq!(record.state, CheckState::Failed);
    assert!(record.skip_reason.contains("Node contains taints not covered by module allowlist"));
    assert!(record.captured_test_output.contains("Taints mask=4096"));
}

#[test]
fn test_module_outside_allow_list_fails() {
    let kernel = MockKernel::tainted(1 << 12)
        .with_module("zfs", "O")
        .with_module("nvidia", "O");
    let record = run_against(&kernel, &["nvidia"]);
    assert_eq!(record.state, CheckState::Failed);
    assert!(record.skip_reason.contains("\"zfs\""));
    assert!(!record.skip_reason.contains("\"nvidia\""));
    assert!(record.captured_test_output.contains("module \"zfs\" taints kernel"));
}

#[test]
fn test_allow_listed_modules_pass() {
    let kernel = MockKernel::tainted((1 << 12) | (1 << 13)).with_module("nvidia", "OE");
    let record = run_against(&kernel, &["nvidia"]);
    assert_eq!(record.state, CheckState::Passed);
    assert!(record.check_details.contains("Passed the tainted kernel check"));
}

#[test]
fn test_taint_without_module_fails() {
    // bit 9: kernel issued warning
    let kernel = MockKernel::tainted((1 << 12) | (1 << 9)).with_module("nvidia", "O");
    let record = run_against(&kernel, &["nvidia"]);
    assert_eq!(record.state, CheckState::Failed);
    assert!(record.skip_reason.contains("kernel issued warning (tainted bit 9)"));
    assert!(record.skip_reason.contains("N/A"));
}

#[test]
fn test_record_carries_catalog_metadata() {
    let record = run_against(&MockKernel::default(), &[]);
    assert_eq!(record.test_id.id, CHECK_ID);
    assert_eq!(record.test_id.suite, "platform-alteration");
    assert!(record.catalog_info.description.contains("tainted kernels"));
    assert!(record
        .catalog_info
        .exception_process
        .starts_with("If taint is necessary"));
}
