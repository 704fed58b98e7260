//! Run orchestration.
//!
//! The [`Orchestrator`] owns the group registry, the catalog and the result
//! map of a process. A run walks the groups in registration order; each group
//! runs on its own worker thread while the orchestrator waits for the first of
//! four events: the group finished, a check of the group requested an abort,
//! the global deadline passed, or an interrupt was delivered.
//!
//! # Interruption
//!
//! On anything but a normal finish, the in-flight group is told to stop (it
//! finishes the check it is running but starts nothing new), its checks are
//! labelled through [`ChecksGroup::on_abort`], and every later group is
//! labelled the same way without being run. Results are recorded for every
//! group either way. No function in this module panics.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::data::catalog::Catalog;
use crate::engine::group::{ChecksGroup, GroupError, GroupRunOutcome};
use crate::engine::guard::invoke_guarded;
use crate::engine::labels::LabelsExpr;
use crate::engine::result::{GroupReport, ResultSummary, ResultsDb, RunReport};
use crate::engine::signals::{
    AbortHandle, Interrupter, RunEvent, StopToken, INTERRUPT_REASON, TIMEOUT_REASON,
};
use crate::{CheckState, CheckrunError};

#[derive(Default)]
struct Registry {
    groups: Vec<Arc<ChecksGroup>>,
    results: ResultsDb,
    catalog: Catalog,
}

/// How waiting on a group ended.
enum GroupWait {
    Done {
        errors: Vec<GroupError>,
        failed_checks: usize,
    },
    Abort(String),
}

/// Process-wide orchestration context.
///
/// The registry lock is held for the whole of [`Orchestrator::run`], so only
/// one run is in flight at a time and registration blocks until it ends.
pub struct Orchestrator {
    registry: Mutex<Registry>,
    interrupter: Interrupter,
}

impl Orchestrator {
    pub fn new(catalog: Catalog) -> Self {
        Orchestrator {
            registry: Mutex::new(Registry {
                catalog,
                ..Registry::default()
            }),
            interrupter: Interrupter::new(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Handle used to deliver SIGINT/SIGTERM (or a test's stand-in) to the
    /// run in flight.
    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    /// Get or create the group called `name`.
    pub fn new_checks_group(&self, name: &str) -> Arc<ChecksGroup> {
        let mut registry = self.registry();
        if let Some(group) = registry.groups.iter().find(|g| g.name() == name) {
            return group.clone();
        }
        let group = Arc::new(ChecksGroup::new(name));
        registry.groups.push(group.clone());
        group
    }

    /// Groups in registration order.
    pub fn groups(&self) -> Vec<Arc<ChecksGroup>> {
        self.registry().groups.clone()
    }

    /// Add catalog entries, replacing those with the same check ID.
    pub fn add_catalog(&self, catalog: Catalog) {
        self.registry().catalog.merge(catalog);
    }

    pub fn catalog(&self) -> Catalog {
        self.registry().catalog.clone()
    }

    /// IDs of the registered checks selected by `expr`.
    pub fn filter_check_ids(&self, expr: &LabelsExpr) -> Vec<String> {
        self.groups()
            .iter()
            .flat_map(|g| g.checks())
            .filter(|c| expr.eval(c.labels()))
            .map(|c| c.id().to_string())
            .collect()
    }

    pub fn results(&self) -> ResultsDb {
        self.registry().results.clone()
    }

    pub fn total_checks(&self) -> usize {
        self.registry().results.len()
    }

    pub fn count_by_state(&self, state: CheckState) -> usize {
        self.registry().results.count_by_state(state)
    }

    /// Per-group counts computed from the current check states.
    pub fn results_summary(&self) -> Vec<GroupReport> {
        self.groups()
            .iter()
            .map(|group| {
                let mut summary = ResultSummary::default();
                let checks = group.checks();
                for check in &checks {
                    summary.add(check.result());
                }
                GroupReport {
                    name: group.name().to_string(),
                    check_ids: checks.iter().map(|c| c.id().to_string()).collect(),
                    summary,
                }
            })
            .collect()
    }

    /// Captured output of every failed check, in registration order.
    pub fn failed_checks_logs(&self) -> Vec<(String, String)> {
        self.groups()
            .iter()
            .flat_map(|g| g.checks())
            .filter(|c| c.result() == CheckState::Failed)
            .map(|c| (c.id().to_string(), c.logs()))
            .collect()
    }

    /// Run every group and return the number of failed checks.
    ///
    /// Fails with the number of group errors when any hook or check errored,
    /// and with the abort reason when the run was interrupted.
    pub fn run_checks(&self, expr: &LabelsExpr, timeout: Duration) -> Result<usize, CheckrunError> {
        self.run(expr, timeout)?.into_result()
    }

    /// Run every group and return the full report.
    ///
    /// Only fatal problems (missing catalog entry, worker spawn failure) are
    /// returned as errors; check and group failures live in the report.
    pub fn run(&self, expr: &LabelsExpr, timeout: Duration) -> Result<RunReport, CheckrunError> {
        let mut registry = self.registry();

        let (tx, rx) = mpsc::channel();
        self.interrupter.attach(tx.clone());
        let outcome = run_groups(&mut registry, expr, timeout, &tx, &rx);
        self.interrupter.detach();

        let report = outcome?;
        if !report.errors.is_empty() {
            error!("RunChecks errors: {:?}", report.errors);
        }
        Ok(report)
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(Catalog::new())
    }
}

fn run_groups(
    registry: &mut Registry,
    expr: &LabelsExpr,
    timeout: Duration,
    tx: &Sender<RunEvent>,
    rx: &Receiver<RunEvent>,
) -> Result<RunReport, CheckrunError> {
    let started_at = Utc::now();
    let start = Instant::now();
    let deadline = start.checked_add(timeout);

    let mut abort_reason: Option<String> = None;
    let mut errors: Vec<GroupError> = Vec::new();
    let mut failed_checks = 0;

    let groups = registry.groups.clone();
    for (idx, group) in groups.iter().enumerate() {
        let expired = deadline.is_some_and(|d| Instant::now() >= d);
        match abort_reason.clone() {
            Some(reason) => group.on_abort(expr, &reason),
            None if expired => {
                warn!("Running all checks timed-out.");
                group.on_abort(expr, TIMEOUT_REASON);
                abort_reason = Some(TIMEOUT_REASON.to_string());
            }
            None => {
                let stop = StopToken::new();
                spawn_group_worker(idx, group.clone(), expr.clone(), stop.clone(), tx.clone())?;

                match wait_group(idx, rx, deadline) {
                    GroupWait::Done {
                        errors: group_errors,
                        failed_checks: group_failed,
                    } => {
                        debug!(group = %group.name(), "Group finished running checks.");
                        errors.extend(group_errors);
                        failed_checks += group_failed;
                    }
                    GroupWait::Abort(reason) => {
                        warn!(group = %group.name(), "Group aborted: {}", reason);
                        stop.stop();
                        group.on_abort(expr, &reason);
                        abort_reason = Some(reason);
                    }
                }
            }
        }

        let Registry {
            results, catalog, ..
        } = &mut *registry;
        group.record_checks_results(catalog, results)?;
    }

    let mut group_reports = Vec::with_capacity(groups.len());
    for group in &groups {
        let mut summary = ResultSummary::default();
        let mut check_ids = Vec::new();
        for check in group.checks() {
            summary.add(check.result());
            check_ids.push(check.id().to_string());
        }
        group_reports.push(GroupReport {
            name: group.name().to_string(),
            check_ids,
            summary,
        });
    }

    Ok(RunReport {
        label_filter: expr.to_string(),
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
        abort_reason,
        errors: errors.iter().map(ToString::to_string).collect(),
        failed_checks,
        groups: group_reports,
        results: registry.results.clone(),
    })
}

fn spawn_group_worker(
    idx: usize,
    group: Arc<ChecksGroup>,
    expr: LabelsExpr,
    stop: StopToken,
    tx: Sender<RunEvent>,
) -> Result<(), CheckrunError> {
    let abort = AbortHandle::new(idx, tx.clone());
    thread::Builder::new()
        .name(format!("group-{}", group.name()))
        .spawn(move || {
            let outcome = invoke_guarded(|| group.run_checks(&expr, &stop, Some(&abort)))
                .unwrap_or_else(|panic| {
                    error!(group = %group.name(), "Group worker panicked: {}", panic);
                    GroupRunOutcome {
                        errors: vec![GroupError::Failure {
                            group: group.name().to_string(),
                            failure_type: format!("worker panicked: {}", panic.message),
                        }],
                        failed_checks: 0,
                    }
                });
            if tx
                .send(RunEvent::GroupDone {
                    group: idx,
                    errors: outcome.errors,
                    failed_checks: outcome.failed_checks,
                })
                .is_err()
            {
                debug!(group = %group.name(), "Group finished after the run ended");
            }
        })
        .map_err(|source| CheckrunError::Spawn { source })?;
    Ok(())
}

/// Wait for group `idx` to finish, or for something to interrupt it.
fn wait_group(idx: usize, rx: &Receiver<RunEvent>, deadline: Option<Instant>) -> GroupWait {
    loop {
        let event = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                rx.recv_timeout(remaining)
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match event {
            Ok(RunEvent::GroupDone {
                group,
                errors,
                failed_checks,
            }) if group == idx => {
                return GroupWait::Done {
                    errors,
                    failed_checks,
                }
            }
            Ok(RunEvent::Abort { group, reason }) if group == idx => return GroupWait::Abort(reason),
            Ok(RunEvent::Interrupted) => {
                warn!("SIGINT/SIGTERM received.");
                return GroupWait::Abort(INTERRUPT_REASON.to_string());
            }
            Ok(stale) => debug!("Ignoring event from an earlier group: {:?}", stale),
            Err(RecvTimeoutError::Timeout) => {
                warn!("Running all checks timed-out.");
                return GroupWait::Abort(TIMEOUT_REASON.to_string());
            }
            // The orchestrator holds a sender for the whole run.
            Err(RecvTimeoutError::Disconnected) => {
                return GroupWait::Done {
                    errors: Vec::new(),
                    failed_checks: 0,
                }
            }
        }
    }
}

impl RunReport {
    /// The run outcome as a single result: the failed-check count, or the
    /// reason the run is not trustworthy.
    pub fn into_result(self) -> Result<usize, CheckrunError> {
        if !self.errors.is_empty() {
            return Err(CheckrunError::ChecksErrors {
                count: self.errors.len(),
            });
        }
        if let Some(reason) = self.abort_reason {
            return Err(CheckrunError::Aborted { reason });
        }
        info!("Run finished, {} failed checks", self.failed_checks);
        Ok(self.failed_checks)
    }
}
