//! Ordered groups of checks sharing lifecycle hooks.
//!
//! # Failure propagation
//!
//! When a hook or a check returns an error or panics, the check being
//! processed is marked `Error`, every check after it is marked `Skipped`, and
//! a single [`GroupError`] naming the group and the failure type is returned.
//! `after_all` still runs exactly once per group run.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::data::catalog::{Catalog, CatalogError};
use crate::engine::check::{Check, CheckError};
use crate::engine::guard::invoke_guarded;
use crate::engine::labels::LabelsExpr;
use crate::engine::result::{record_check_result, ResultsDb};
use crate::engine::signals::{AbortHandle, StopToken};
use crate::CheckState;

/// Hook receiving every check selected for the run.
pub type AllChecksFn = Arc<dyn Fn(&[Arc<Check>]) -> anyhow::Result<()> + Send + Sync>;

/// Hook receiving the check about to run or just run.
pub type EachCheckFn = Arc<dyn Fn(&Check) -> anyhow::Result<()> + Send + Sync>;

pub const NOT_MATCHING_LABELS: &str = "not matching labels";

/// Error returned by a group run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    /// A hook or check failed; see the `Error` check for details.
    #[error("group {group} {failure_type}")]
    Failure { group: String, failure_type: String },
    /// A check requested an abort of the run.
    #[error("{0}")]
    Aborted(String),
}

/// What a group run hands back to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupRunOutcome {
    pub errors: Vec<GroupError>,
    pub failed_checks: usize,
}

#[derive(Clone, Default)]
struct GroupHooks {
    before_all: Option<AllChecksFn>,
    after_all: Option<AllChecksFn>,
    before_each: Option<EachCheckFn>,
    after_each: Option<EachCheckFn>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Log a check's current state the way progress is reported to operators.
pub fn print_check_result(check: &Check) {
    let tag = match check.result() {
        CheckState::Passed => "PASS",
        CheckState::Failed => "FAIL",
        CheckState::Skipped => "SKIP",
        CheckState::Error => "ERROR",
        CheckState::Aborted => "ABORTED",
    };
    info!(check = %check.id(), "[ {} ]", tag);
}

fn skip_check(check: &Check, reason: &str) {
    check.log_info(format!("Skipping check {}, reason: {}", check.id(), reason));
    check.set_result_skipped(reason);
    print_check_result(check);
}

fn skip_all(checks: &[Arc<Check>], reason: &str) {
    for check in checks {
        skip_check(check, reason);
    }
}

/// A named, ordered collection of checks.
pub struct ChecksGroup {
    name: String,
    checks: RwLock<Vec<Arc<Check>>>,
    hooks: RwLock<GroupHooks>,
    current_running_check_idx: Mutex<Option<usize>>,
}

impl ChecksGroup {
    pub fn new(name: impl Into<String>) -> Self {
        ChecksGroup {
            name: name.into(),
            checks: RwLock::new(Vec::new()),
            hooks: RwLock::new(GroupHooks::default()),
            current_running_check_idx: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn update_hooks(&self, f: impl FnOnce(&mut GroupHooks)) -> &Self {
        match self.hooks.write() {
            Ok(mut hooks) => f(&mut hooks),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
        self
    }

    fn hooks(&self) -> GroupHooks {
        match self.hooks.read() {
            Ok(hooks) => hooks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn with_before_all_fn<F>(&self, f: F) -> &Self
    where
        F: Fn(&[Arc<Check>]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.update_hooks(|h| h.before_all = Some(Arc::new(f)))
    }

    pub fn with_after_all_fn<F>(&self, f: F) -> &Self
    where
        F: Fn(&[Arc<Check>]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.update_hooks(|h| h.after_all = Some(Arc::new(f)))
    }

    pub fn with_before_each_fn<F>(&self, f: F) -> &Self
    where
        F: Fn(&Check) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.update_hooks(|h| h.before_each = Some(Arc::new(f)))
    }

    pub fn with_after_each_fn<F>(&self, f: F) -> &Self
    where
        F: Fn(&Check) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.update_hooks(|h| h.after_each = Some(Arc::new(f)))
    }

    /// Append a check. Returns a shared handle to it.
    pub fn add(&self, check: Check) -> Arc<Check> {
        let check = Arc::new(check);
        match self.checks.write() {
            Ok(mut checks) => checks.push(check.clone()),
            Err(poisoned) => poisoned.into_inner().push(check.clone()),
        }
        check
    }

    /// Snapshot of the registered checks in registration order.
    pub fn checks(&self) -> Vec<Arc<Check>> {
        match self.checks.read() {
            Ok(checks) => checks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Index, within the label-matching subset, of the check in flight.
    pub fn current_running_check_idx(&self) -> Option<usize> {
        *lock(&self.current_running_check_idx)
    }

    fn set_current_running_check_idx(&self, idx: Option<usize>) {
        *lock(&self.current_running_check_idx) = idx;
    }

    fn on_failure(
        &self,
        failure_type: &str,
        failure_msg: &str,
        current: &Check,
        remaining: &[Arc<Check>],
    ) -> GroupError {
        error!(group = %self.name, check = %current.id(), "[ ERROR ] {}", failure_type);
        current.set_result_error(format!("{}: {}", failure_type, failure_msg));
        let reason = format!("group {} {}", self.name, failure_type);
        skip_all(remaining, &reason);
        GroupError::Failure {
            group: self.name.clone(),
            failure_type: failure_type.to_string(),
        }
    }

    /// Invoke a hook, feeding errors and panics into the failure policy.
    fn run_hook(
        &self,
        hook_name: &str,
        call: impl FnOnce() -> anyhow::Result<()>,
        current: &Check,
        remaining: &[Arc<Check>],
    ) -> Result<(), GroupError> {
        match invoke_guarded(call) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(group = %self.name, "Unexpected error while running {} function: {:#}", hook_name, e);
                Err(self.on_failure(
                    &format!("{} function unexpected error", hook_name),
                    &format!("{:#}", e),
                    current,
                    remaining,
                ))
            }
            Err(panic) => {
                error!(group = %self.name, "Panic while running {} function:\n{}", hook_name, panic);
                Err(self.on_failure(
                    &format!("{} function panicked", hook_name),
                    &format!("\n: {}", panic),
                    current,
                    remaining,
                ))
            }
        }
    }

    fn run_before_all(&self, hooks: &GroupHooks, checks: &[Arc<Check>]) -> Result<(), GroupError> {
        debug!(group = %self.name, "Running beforeAll");
        let Some(before_all) = &hooks.before_all else {
            return Ok(());
        };
        self.run_hook("beforeAll", || before_all(checks), &checks[0], checks)
    }

    fn run_after_all(&self, hooks: &GroupHooks, checks: &[Arc<Check>]) -> Result<(), GroupError> {
        debug!(group = %self.name, "Running afterAll");
        let Some(after_all) = &hooks.after_all else {
            return Ok(());
        };
        let last = &checks[checks.len() - 1];
        self.run_hook("afterAll", || after_all(checks), last, &[])
    }

    fn run_before_each(
        &self,
        hooks: &GroupHooks,
        check: &Check,
        remaining: &[Arc<Check>],
    ) -> Result<(), GroupError> {
        debug!(group = %self.name, check = %check.id(), "Running beforeEach");
        let Some(before_each) = &hooks.before_each else {
            return Ok(());
        };
        self.run_hook("beforeEach", || before_each(check), check, remaining)
    }

    fn run_after_each(
        &self,
        hooks: &GroupHooks,
        check: &Check,
        remaining: &[Arc<Check>],
    ) -> Result<(), GroupError> {
        debug!(group = %self.name, check = %check.id(), "Running afterEach");
        let Some(after_each) = &hooks.after_each else {
            return Ok(());
        };
        self.run_hook("afterEach", || after_each(check), check, remaining)
    }

    fn run_check(&self, check: &Check, remaining: &[Arc<Check>]) -> Result<(), GroupError> {
        match invoke_guarded(|| check.run()) {
            Ok(Ok(())) => {
                print_check_result(check);
                Ok(())
            }
            Ok(Err(CheckError::Aborted(request))) => {
                warn!(group = %self.name, "Check was manually aborted, msg: {}", request.message);
                Err(GroupError::Aborted(request.message))
            }
            Ok(Err(e)) => {
                check.log_error(format!(
                    "Unexpected error while running check {} function: {}",
                    check.id(),
                    e
                ));
                Err(self.on_failure(
                    &format!("check {} function unexpected error", check.id()),
                    &e.to_string(),
                    check,
                    remaining,
                ))
            }
            Err(panic) => {
                check.log_error(format!(
                    "Panic while running check {} function:\n{}",
                    check.id(),
                    panic
                ));
                Err(self.on_failure(
                    &format!("check {} function panic", check.id()),
                    &panic.to_string(),
                    check,
                    remaining,
                ))
            }
        }
    }

    /// Run the checks whose labels satisfy `expr`.
    ///
    /// The stop token is polled before each check; once it is set no further
    /// check or per-check hook starts. `abort` is handed to every check so it
    /// can request an abort of the whole run.
    pub fn run_checks(
        &self,
        expr: &LabelsExpr,
        stop: &StopToken,
        abort: Option<&AbortHandle>,
    ) -> GroupRunOutcome {
        info!(group = %self.name, "Running group checks");
        self.set_current_running_check_idx(None);

        let all_checks = self.checks();
        let mut checks = Vec::with_capacity(all_checks.len());
        for check in &all_checks {
            if expr.eval(check.labels()) {
                checks.push(check.clone());
            } else {
                skip_check(check, NOT_MATCHING_LABELS);
            }
        }

        let mut outcome = GroupRunOutcome::default();
        if checks.is_empty() {
            return outcome;
        }

        let hooks = self.hooks();
        match self.run_before_all(&hooks, &checks) {
            Err(e) => outcome.errors.push(e),
            Ok(()) => {
                info!(
                    group = %self.name,
                    "Checks to run: {} (group's total={})",
                    checks.len(),
                    all_checks.len()
                );
                self.run_loop(&hooks, &checks, stop, abort, &mut outcome);
            }
        }

        if let Err(e) = self.run_after_all(&hooks, &checks) {
            outcome.errors.push(e);
        }

        outcome
    }

    fn run_loop(
        &self,
        hooks: &GroupHooks,
        checks: &[Arc<Check>],
        stop: &StopToken,
        abort: Option<&AbortHandle>,
        outcome: &mut GroupRunOutcome,
    ) {
        self.set_current_running_check_idx(Some(0));

        for (i, check) in checks.iter().enumerate() {
            if stop.is_stopped() {
                info!(group = %self.name, "Stop requested, leaving the remaining checks");
                return;
            }

            let remaining = &checks[i + 1..];
            let mut errors = Vec::new();

            if let Err(e) = self.run_before_each(hooks, check, remaining) {
                errors.push(e);
            }

            if errors.is_empty() {
                if let Some(reason) = check.skip_decision() {
                    skip_check(check, &reason);
                } else {
                    if let Some(handle) = abort {
                        check.set_abort_handle(handle.clone());
                    }
                    if let Err(e) = self.run_check(check, remaining) {
                        errors.push(e);
                    }
                }
            }

            if let Err(e) = self.run_after_each(hooks, check, remaining) {
                errors.push(e);
            }

            if !errors.is_empty() {
                outcome.errors.extend(errors);
                return;
            }

            if check.result() == CheckState::Failed {
                outcome.failed_checks += 1;
            }

            self.set_current_running_check_idx(Some(i + 1));
        }
    }

    /// Label the checks of an interrupted run.
    ///
    /// The check at the cursor becomes `Aborted`, the matching checks after
    /// it become `Skipped`. Checks before the cursor keep their result. When
    /// no check ever started, every matching check is skipped.
    pub fn on_abort(&self, expr: &LabelsExpr, reason: &str) {
        let cursor = self.current_running_check_idx();
        if cursor.is_none() {
            info!(group = %self.name, "Skipping checks from group");
        }

        let mut idx = 0;
        for check in self.checks() {
            if !expr.eval(check.labels()) {
                check.set_result_skipped(NOT_MATCHING_LABELS);
                continue;
            }

            match cursor {
                None => check.set_result_skipped(reason),
                Some(current) if idx == current => check.set_result_aborted(reason),
                Some(current) if idx > current => check.set_result_skipped(reason),
                Some(_) => {}
            }
            idx += 1;

            print_check_result(&check);
        }
    }

    /// Store a result record for every check of the group.
    pub fn record_checks_results(
        &self,
        catalog: &Catalog,
        results: &mut ResultsDb,
    ) -> Result<(), CatalogError> {
        info!(group = %self.name, "Recording checks results");
        for check in self.checks() {
            let record = record_check_result(&check, catalog)?;
            results.insert(check.id().to_string(), record);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChecksGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecksGroup")
            .field("name", &self.name)
            .field("checks", &self.checks().len())
            .field("current_running_check_idx", &self.current_running_check_idx())
            .finish()
    }
}
