//! Mock checks and fixtures for integration tests.
//!
//! Check builders cover every way a check body can end: pass, fail, error,
//! panic, abort request and a slow body for deadline tests. Mock check IDs
//! are `mock-<name>` so the catalog can be derived from them.

pub mod kernel;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use checkrun::data::catalog::{Catalog, EntrySpec};
use checkrun::data::report::ReportObject;
use checkrun::{Check, Orchestrator};

pub use kernel::MockKernel;

pub const MOCK_SUITE: &str = "mock";

pub fn mock_id(name: &str) -> String {
    format!("{}-{}", MOCK_SUITE, name)
}

/// Catalog with an entry for each mock check name.
pub fn mock_catalog(names: &[&str]) -> Catalog {
    let mut catalog = Catalog::new();
    for name in names {
        catalog.add_entry(EntrySpec {
            test_id: name.to_string(),
            suite: MOCK_SUITE.to_string(),
            description: format!("Mock check {}", name),
            remediation: format!("Fix {}", name),
            ..EntrySpec::default()
        });
    }
    catalog
}

pub fn passing_check(name: &str, labels: &[&str]) -> Check {
    Check::new(mock_id(name), labels.to_vec()).with_check_fn(|c: &Check| {
        c.log_info("all objects compliant");
        c.set_result(&[ReportObject::new("Mock", "compliant", true)], &[]);
        Ok(())
    })
}

pub fn failing_check(name: &str, labels: &[&str]) -> Check {
    Check::new(mock_id(name), labels.to_vec()).with_check_fn(|c: &Check| {
        c.log_error("found a non-compliant object");
        c.set_result(&[], &[ReportObject::new("Mock", "non-compliant", false)]);
        Ok(())
    })
}

pub fn erroring_check(name: &str, labels: &[&str]) -> Check {
    Check::new(mock_id(name), labels.to_vec())
        .with_check_fn(|_: &Check| Err(anyhow::anyhow!("backend unreachable")))
}

pub fn panicking_check(name: &str, labels: &[&str]) -> Check {
    Check::new(mock_id(name), labels.to_vec())
        .with_check_fn(|_: &Check| -> anyhow::Result<()> { panic!("mock check exploded") })
}

pub fn aborting_check(name: &str, labels: &[&str], reason: &'static str) -> Check {
    Check::new(mock_id(name), labels.to_vec())
        .with_check_fn(move |c: &Check| Err(c.abort(reason)))
}

pub fn sleeping_check(name: &str, labels: &[&str], sleep: Duration) -> Check {
    Check::new(mock_id(name), labels.to_vec()).with_check_fn(move |c: &Check| {
        std::thread::sleep(sleep);
        c.set_result(&[ReportObject::new("Mock", "slow but compliant", true)], &[]);
        Ok(())
    })
}

/// A passing check counting how often its body ran.
pub fn counting_check(name: &str, labels: &[&str], runs: Arc<AtomicUsize>) -> Check {
    Check::new(mock_id(name), labels.to_vec()).with_check_fn(move |c: &Check| {
        runs.fetch_add(1, Ordering::SeqCst);
        c.set_result(&[ReportObject::new("Mock", "counted", true)], &[]);
        Ok(())
    })
}

/// Orchestrator with one group per entry and a catalog covering every check.
pub fn mock_orchestrator(groups: Vec<(&str, Vec<Check>)>) -> Orchestrator {
    let names: Vec<String> = groups
        .iter()
        .flat_map(|(_, checks)| checks.iter())
        .map(|c| c.id().trim_start_matches("mock-").to_string())
        .collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();

    let orchestrator = Orchestrator::new(mock_catalog(&name_refs));
    for (group_name, checks) in groups {
        let group = orchestrator.new_checks_group(group_name);
        for check in checks {
            group.add(check);
        }
    }
    orchestrator
}
