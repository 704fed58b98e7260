//! Result recording and aggregation.
//!
//! After a group finishes, every check in it is turned into an immutable
//! [`ResultRecord`] keyed by check ID. The run report bundles those records
//! with per-group summaries for the output formatters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::catalog::{CatalogError, CategoryClassification, ClaimId, Catalog};
use crate::engine::check::Check;
use crate::CheckState;

/// Catalog metadata copied into a result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogInfo {
    pub description: String,
    pub remediation: String,
    pub best_practice_reference: String,
    pub exception_process: String,
}

/// Outcome of one check, as written to reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub test_id: ClaimId,
    pub state: CheckState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Whole seconds, truncated.
    pub duration: i64,
    pub skip_reason: String,
    pub captured_test_output: String,
    pub check_details: String,
    pub category_classification: CategoryClassification,
    pub catalog_info: CatalogInfo,
}

/// Build the record of `check`. A check without catalog entry is an error.
pub fn record_check_result(check: &Check, catalog: &Catalog) -> Result<ResultRecord, CatalogError> {
    let entry = catalog.lookup(check.id())?;
    let state = check.result();

    check.log_info(format!(
        "Recording result {:?}, claimID: {}",
        state.to_string().to_uppercase(),
        entry.identifier.id
    ));

    let start_time = check.start_time();
    let end_time = check.end_time();
    let duration = match (start_time, end_time) {
        (Some(start), Some(end)) => (end - start).num_seconds(),
        _ => 0,
    };

    Ok(ResultRecord {
        test_id: entry.identifier.clone(),
        state,
        start_time,
        end_time,
        duration,
        skip_reason: check.failure_reason(),
        captured_test_output: check.logs(),
        check_details: check.details(),
        category_classification: entry.category_classification.clone(),
        catalog_info: CatalogInfo {
            description: entry.description.clone(),
            remediation: entry.remediation.clone(),
            best_practice_reference: entry.best_practice_reference.clone(),
            exception_process: entry.exception_process.clone(),
        },
    })
}

/// Result records keyed by check ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsDb {
    records: BTreeMap<String, ResultRecord>,
}

impl ResultsDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, check_id: String, record: ResultRecord) {
        self.records.insert(check_id, record);
    }

    pub fn get(&self, check_id: &str) -> Option<&ResultRecord> {
        self.records.get(check_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResultRecord)> {
        self.records.iter()
    }

    pub fn count_by_state(&self, state: CheckState) -> usize {
        self.records.values().filter(|r| r.state == state).count()
    }

    /// Distinct suites of the recorded checks, sorted.
    pub fn suites(&self) -> Vec<String> {
        let mut suites: Vec<String> = self
            .records
            .values()
            .map(|r| r.test_id.suite.clone())
            .collect();
        suites.sort();
        suites.dedup();
        suites
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Result summary statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub error: u32,
    pub aborted: u32,
    pub total: u32,
}

impl ResultSummary {
    pub fn add(&mut self, state: CheckState) {
        self.total += 1;
        match state {
            CheckState::Passed => self.passed += 1,
            CheckState::Failed => self.failed += 1,
            CheckState::Skipped => self.skipped += 1,
            CheckState::Error => self.error += 1,
            CheckState::Aborted => self.aborted += 1,
        }
    }

    pub fn merge(&mut self, other: &ResultSummary) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.error += other.error;
        self.aborted += other.aborted;
        self.total += other.total;
    }
}

/// Summary of one group, in registration order within the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    pub name: String,
    pub check_ids: Vec<String>,
    pub summary: ResultSummary,
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub label_filter: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Reason the run was aborted, if it was.
    pub abort_reason: Option<String>,
    pub errors: Vec<String>,
    pub failed_checks: usize,
    pub groups: Vec<GroupReport>,
    pub results: ResultsDb,
}

impl RunReport {
    /// Totals over every group.
    pub fn summary(&self) -> ResultSummary {
        let mut summary = ResultSummary::default();
        for group in &self.groups {
            summary.merge(&group.summary);
        }
        summary
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    /// Records in group registration order.
    pub fn ordered_results(&self) -> Vec<(&GroupReport, &ResultRecord)> {
        self.groups
            .iter()
            .flat_map(|g| {
                g.check_ids
                    .iter()
                    .filter_map(move |id| self.results.get(id).map(|r| (g, r)))
            })
            .collect()
    }

    /// Captured output of every failed check, keyed by check ID.
    pub fn failed_checks_logs(&self) -> Vec<(&str, &str)> {
        self.ordered_results()
            .into_iter()
            .filter(|(_, r)| r.state == CheckState::Failed)
            .map(|(_, r)| (r.test_id.id.as_str(), r.captured_test_output.as_str()))
            .collect()
    }
}
