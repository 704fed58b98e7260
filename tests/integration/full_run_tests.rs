//! Full run integration tests.
//!
//! Tests for complete orchestrated runs: result recording, failure
//! propagation inside a group, the global deadline, interrupts and abort
//! requests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use checkrun::engine::labels::LabelsExpr;
use checkrun::engine::signals::{INTERRUPT_REASON, TIMEOUT_REASON};
use checkrun::{exit_code, CheckState, CheckrunError, EXIT_ERRORS, EXIT_FAILED, EXIT_PASSED};

use crate::mocks::*;

const LONG: Duration = Duration::from_secs(60);

fn expr(text: &str) -> LabelsExpr {
    LabelsExpr::parse(text).unwrap()
}

#[test]
fn test_all_checks_pass() {
    let orchestrator = mock_orchestrator(vec![
        ("networking", vec![passing_check("a", &["common"]), passing_check("b", &["common"])]),
        ("platform", vec![passing_check("c", &["common"])]),
    ]);

    let report = orchestrator.run(&expr("common"), LONG).unwrap();

    assert_eq!(report.summary().passed, 3);
    assert_eq!(report.summary().total, 3);
    assert!(report.errors.is_empty());
    assert!(!report.is_aborted());
    assert_eq!(exit_code(&report), EXIT_PASSED);
    assert_eq!(report.into_result().unwrap(), 0);
}

#[test]
fn test_failed_checks_are_counted() {
    let orchestrator = mock_orchestrator(vec![(
        "networking",
        vec![failing_check("a", &["common"]), passing_check("b", &["common"])],
    )]);

    let report = orchestrator.run(&expr("common"), LONG).unwrap();

    assert_eq!(report.failed_checks, 1);
    assert_eq!(exit_code(&report), EXIT_FAILED);
    let record = report.results.get("mock-a").unwrap();
    assert_eq!(record.state, CheckState::Failed);
    assert!(record.skip_reason.contains("non-compliant"));
    assert!(record.captured_test_output.contains("found a non-compliant object"));
    assert_eq!(report.failed_checks_logs().len(), 1);
}

#[test]
fn test_non_matching_checks_are_skipped() {
    let orchestrator = mock_orchestrator(vec![(
        "mixed",
        vec![passing_check("a", &["common"]), passing_check("b", &["telco"])],
    )]);

    let report = orchestrator.run(&expr("common"), LONG).unwrap();

    assert_eq!(report.results.get("mock-a").unwrap().state, CheckState::Passed);
    let skipped = report.results.get("mock-b").unwrap();
    assert_eq!(skipped.state, CheckState::Skipped);
    assert_eq!(skipped.skip_reason, "not matching labels");
}

#[test]
fn test_check_error_skips_rest_of_group_only() {
    let orchestrator = mock_orchestrator(vec![
        (
            "first",
            vec![
                passing_check("a", &["common"]),
                erroring_check("b", &["common"]),
                passing_check("c", &["common"]),
            ],
        ),
        ("second", vec![passing_check("d", &["common"])]),
    ]);

    let report = orchestrator.run(&expr("common"), LONG).unwrap();

    assert_eq!(report.errors, vec!["group first check mock-b function unexpected error"]);
    assert_eq!(report.results.get("mock-a").unwrap().state, CheckState::Passed);
    assert_eq!(report.results.get("mock-b").unwrap().state, CheckState::Error);
    let c = report.results.get("mock-c").unwrap();
    assert_eq!(c.state, CheckState::Skipped);
    assert_eq!(c.skip_reason, "group first check mock-b function unexpected error");
    assert_eq!(report.results.get("mock-d").unwrap().state, CheckState::Passed);
    assert_eq!(exit_code(&report), EXIT_ERRORS);
}

#[test]
fn test_check_panic_is_contained() {
    let orchestrator = mock_orchestrator(vec![(
        "fragile",
        vec![panicking_check("a", &["common"]), passing_check("b", &["common"])],
    )]);

    let report = orchestrator.run(&expr("common"), LONG).unwrap();

    let a = report.results.get("mock-a").unwrap();
    assert_eq!(a.state, CheckState::Error);
    assert!(a.skip_reason.contains("mock check exploded"));
    assert_eq!(report.results.get("mock-b").unwrap().state, CheckState::Skipped);
    assert!(matches!(
        report.into_result(),
        Err(CheckrunError::ChecksErrors { count: 1 })
    ));
}

#[test]
fn test_errors_from_several_groups_are_aggregated() {
    let orchestrator = mock_orchestrator(vec![
        ("one", vec![erroring_check("a", &["common"])]),
        ("two", vec![panicking_check("b", &["common"])]),
    ]);

    let err = orchestrator.run_checks(&expr("common"), LONG).unwrap_err();
    assert_eq!(err.to_string(), "2 errors found in checks/groups");
}

#[test]
fn test_before_all_failure_skips_whole_group() {
    let orchestrator = mock_orchestrator(vec![(
        "hooked",
        vec![passing_check("a", &["common"]), passing_check("b", &["common"])],
    )]);
    orchestrator.groups()[0]
        .with_before_all_fn(|_| Err(anyhow::anyhow!("cluster not ready")));

    let report = orchestrator.run(&expr("common"), LONG).unwrap();

    let a = report.results.get("mock-a").unwrap();
    assert_eq!(a.state, CheckState::Error);
    assert!(a.skip_reason.contains("cluster not ready"));
    let b = report.results.get("mock-b").unwrap();
    assert_eq!(b.state, CheckState::Skipped);
    assert_eq!(b.skip_reason, "group hooked beforeAll function unexpected error");
}

#[test]
fn test_global_timeout_aborts_run() {
    let orchestrator = mock_orchestrator(vec![
        (
            "slow",
            vec![
                sleeping_check("a", &["common"], Duration::from_millis(500)),
                passing_check("b", &["common"]),
            ],
        ),
        ("later", vec![passing_check("c", &["common"])]),
    ]);

    let report = orchestrator
        .run(&expr("common"), Duration::from_millis(50))
        .unwrap();

    assert_eq!(report.abort_reason.as_deref(), Some(TIMEOUT_REASON));
    let a = report.results.get("mock-a").unwrap();
    assert_eq!(a.state, CheckState::Aborted);
    assert_eq!(a.skip_reason, TIMEOUT_REASON);
    assert_eq!(report.results.get("mock-b").unwrap().state, CheckState::Skipped);
    let c = report.results.get("mock-c").unwrap();
    assert_eq!(c.state, CheckState::Skipped);
    assert_eq!(c.skip_reason, TIMEOUT_REASON);
    assert_eq!(exit_code(&report), EXIT_ERRORS);
}

#[test]
fn test_interrupt_aborts_run() {
    let runs = Arc::new(AtomicUsize::new(0));
    let orchestrator = mock_orchestrator(vec![
        (
            "slow",
            vec![sleeping_check("a", &["common"], Duration::from_millis(300))],
        ),
        ("later", vec![counting_check("b", &["common"], runs.clone())]),
    ]);

    let interrupter = orchestrator.interrupter();
    let sender = std::thread::spawn(move || {
        // Let the first check start, then retry until the run is listening.
        std::thread::sleep(Duration::from_millis(100));
        for _ in 0..100 {
            if interrupter.interrupt() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    });

    let err = orchestrator.run_checks(&expr("common"), LONG).unwrap_err();
    assert!(sender.join().unwrap());

    match err {
        CheckrunError::Aborted { reason } => assert_eq!(reason, INTERRUPT_REASON),
        other => panic!("expected an aborted run, got {:?}", other),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(orchestrator.count_by_state(CheckState::Aborted), 1);
    assert_eq!(orchestrator.count_by_state(CheckState::Skipped), 1);
}

#[test]
fn test_abort_request_from_check() {
    let runs = Arc::new(AtomicUsize::new(0));
    let orchestrator = mock_orchestrator(vec![
        (
            "first",
            vec![
                aborting_check("a", &["common"], "node lost"),
                counting_check("b", &["common"], runs.clone()),
            ],
        ),
        ("second", vec![counting_check("c", &["common"], runs.clone())]),
    ]);

    let report = orchestrator.run(&expr("common"), LONG).unwrap();

    let reason = "mock-a called abort: node lost";
    assert_eq!(report.abort_reason.as_deref(), Some(reason));
    let a = report.results.get("mock-a").unwrap();
    assert_eq!(a.state, CheckState::Aborted);
    assert_eq!(a.skip_reason, reason);
    assert_eq!(report.results.get("mock-b").unwrap().state, CheckState::Skipped);
    assert_eq!(report.results.get("mock-c").unwrap().state, CheckState::Skipped);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_catalog_entry_is_fatal() {
    let orchestrator = mock_orchestrator(vec![("known", vec![passing_check("a", &["common"])])]);
    orchestrator
        .new_checks_group("unknown")
        .add(passing_check("not-in-catalog", &["common"]));

    let err = orchestrator.run(&expr("common"), LONG).unwrap_err();
    assert!(matches!(err, CheckrunError::Catalog(_)));
    assert!(err.to_string().contains("mock-not-in-catalog"));
}

#[test]
fn test_results_queries_after_run() {
    let orchestrator = mock_orchestrator(vec![
        ("g1", vec![passing_check("a", &["common"]), failing_check("b", &["common"])]),
        ("g2", vec![passing_check("c", &["telco"])]),
    ]);

    orchestrator.run(&expr("common"), LONG).unwrap();

    assert_eq!(orchestrator.total_checks(), 3);
    assert_eq!(orchestrator.count_by_state(CheckState::Passed), 1);
    assert_eq!(orchestrator.count_by_state(CheckState::Failed), 1);
    assert_eq!(orchestrator.count_by_state(CheckState::Skipped), 1);

    let summary = orchestrator.results_summary();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].name, "g1");
    assert_eq!(summary[0].summary.failed, 1);
    assert_eq!(summary[1].summary.skipped, 1);

    let logs = orchestrator.failed_checks_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].0, "mock-b");

    let record = orchestrator.results().get("mock-a").cloned().unwrap();
    assert_eq!(record.test_id.suite, "mock");
    assert_eq!(record.catalog_info.description, "Mock check a");
}

#[test]
fn test_list_matches_filter() {
    let orchestrator = mock_orchestrator(vec![(
        "g",
        vec![
            passing_check("a", &["common"]),
            passing_check("b", &["telco"]),
            passing_check("c", &["common", "telco"]),
        ],
    )]);

    assert_eq!(
        orchestrator.filter_check_ids(&expr("common && !telco")),
        vec!["mock-a"]
    );
    assert_eq!(orchestrator.filter_check_ids(&expr("telco")).len(), 2);
}
