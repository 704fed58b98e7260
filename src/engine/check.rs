//! A single unit of verification.
//!
//! A [`Check`] is built once with a chain of `with_*` calls, handed to a
//! [`ChecksGroup`](crate::engine::group::ChecksGroup), and from then on only
//! mutated through its result setters, which all take the same lock.
//!
//! # Result state machine
//!
//! `Passed` is the initial state. Any setter may move it to `Skipped`,
//! `Failed`, `Error` or `Aborted`, with two restrictions:
//! - `Aborted` is absorbing: every later setter is a silent no-op.
//! - `Error` wins over everything except an abort: a second error is rejected
//!   with a warning and `Failed`/`Skipped` setters are refused.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::data::report::{result_objects_to_string, ReportObject};
use crate::engine::guard::invoke_guarded;
use crate::engine::signals::AbortHandle;
use crate::CheckState;

/// Body of a check, and of its optional before/after functions.
pub type CheckFn = Arc<dyn Fn(&Check) -> anyhow::Result<()> + Send + Sync>;

/// Skip predicate: `Some(reason)` asks for the check to be skipped.
pub type SkipCheckFn = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// How the results of several skip predicates are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipMode {
    /// Skip when any predicate asks for it.
    #[default]
    Any,
    /// Skip only when every predicate asks for it.
    All,
}

/// Builder misuse, detected when the offending `with_*` call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("check id must not be empty")]
    EmptyId,
    #[error("check {id}: labels must not be empty strings")]
    EmptyLabel { id: String },
    #[error("check {id}: timeout must be greater than zero")]
    ZeroTimeout { id: String },
}

/// Phase of [`Check::run`] an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    Before,
    Check,
    After,
}

impl fmt::Display for CheckPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckPhase::Before => write!(f, "before check"),
            CheckPhase::Check => write!(f, "check"),
            CheckPhase::After => write!(f, "after check"),
        }
    }
}

/// Returned by a check body that asked for the whole run to be aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AbortRequest {
    pub message: String,
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("unable to run due to a previously existing error: {0}")]
    PriorConstructionError(#[source] BuildError),
    #[error("check {id} has no check function")]
    MissingCheckFn { id: String },
    #[error("check {id} failed in {phase} function: {cause:#}")]
    Phase {
        id: String,
        phase: CheckPhase,
        cause: anyhow::Error,
    },
    #[error(transparent)]
    Aborted(#[from] AbortRequest),
}

#[derive(Debug, Clone)]
struct CheckStatus {
    result: CheckState,
    failure_reason: String,
    details: String,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl Default for CheckStatus {
    fn default() -> Self {
        CheckStatus {
            result: CheckState::Passed,
            failure_reason: String::new(),
            details: String::new(),
            start_time: None,
            end_time: None,
        }
    }
}

/// A named, labeled unit of verification.
pub struct Check {
    id: String,
    labels: Vec<String>,

    before_check_fn: Option<CheckFn>,
    check_fn: Option<CheckFn>,
    after_check_fn: Option<CheckFn>,

    skip_check_fns: Vec<SkipCheckFn>,
    skip_mode: SkipMode,

    timeout: Option<Duration>,
    construction_error: Option<BuildError>,

    status: Mutex<CheckStatus>,
    log_archive: Mutex<String>,
    abort_handle: Mutex<Option<AbortHandle>>,
}

/// Stamps the end time when [`Check::run`] returns or unwinds.
struct FinishGuard<'a> {
    check: &'a Check,
    started: std::time::Instant,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        lock(&self.check.status).end_time = Some(Utc::now());
        if let Some(budget) = self.check.timeout {
            let elapsed = self.started.elapsed();
            if elapsed > budget {
                self.check.log_warn(format!(
                    "Check {} took {:?}, exceeding its timeout of {:?}",
                    self.check.id, elapsed, budget
                ));
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Check {
    pub fn new<I, S>(id: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();

        let construction_error = if id.trim().is_empty() {
            Some(BuildError::EmptyId)
        } else if labels.iter().any(|l| l.trim().is_empty()) {
            Some(BuildError::EmptyLabel { id: id.clone() })
        } else {
            None
        };

        Check {
            id,
            labels,
            before_check_fn: None,
            check_fn: None,
            after_check_fn: None,
            skip_check_fns: Vec::new(),
            skip_mode: SkipMode::Any,
            timeout: None,
            construction_error,
            status: Mutex::new(CheckStatus::default()),
            log_archive: Mutex::new(String::new()),
            abort_handle: Mutex::new(None),
        }
    }

    /// Apply one builder step unless an earlier step already failed.
    fn step(mut self, f: impl FnOnce(&mut Self) -> Result<(), BuildError>) -> Self {
        if self.construction_error.is_none() {
            if let Err(e) = f(&mut self) {
                self.construction_error = Some(e);
            }
        }
        self
    }

    pub fn with_check_fn<F>(self, f: F) -> Self
    where
        F: Fn(&Check) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.step(|c| {
            c.check_fn = Some(Arc::new(f));
            Ok(())
        })
    }

    pub fn with_before_check_fn<F>(self, f: F) -> Self
    where
        F: Fn(&Check) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.step(|c| {
            c.before_check_fn = Some(Arc::new(f));
            Ok(())
        })
    }

    pub fn with_after_check_fn<F>(self, f: F) -> Self
    where
        F: Fn(&Check) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.step(|c| {
            c.after_check_fn = Some(Arc::new(f));
            Ok(())
        })
    }

    /// Append a skip predicate; predicates accumulate across calls.
    pub fn with_skip_check_fn<F>(self, f: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.step(|c| {
            c.skip_check_fns.push(Arc::new(f));
            Ok(())
        })
    }

    /// Provided for completeness; `Any` is already the default.
    pub fn with_skip_mode_any(self) -> Self {
        self.step(|c| {
            c.skip_mode = SkipMode::Any;
            Ok(())
        })
    }

    pub fn with_skip_mode_all(self) -> Self {
        self.step(|c| {
            c.skip_mode = SkipMode::All;
            Ok(())
        })
    }

    /// Advisory execution budget. Exceeding it is logged, never enforced.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.step(|c| {
            if timeout.is_zero() {
                return Err(BuildError::ZeroTimeout { id: c.id.clone() });
            }
            c.timeout = Some(timeout);
            Ok(())
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn skip_mode(&self) -> SkipMode {
        self.skip_mode
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn construction_error(&self) -> Option<&BuildError> {
        self.construction_error.as_ref()
    }

    pub fn result(&self) -> CheckState {
        lock(&self.status).result
    }

    pub fn failure_reason(&self) -> String {
        lock(&self.status).failure_reason.clone()
    }

    /// JSON rendering of the last report objects passed to [`Check::set_result`].
    pub fn details(&self) -> String {
        lock(&self.status).details.clone()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.status).start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.status).end_time
    }

    /// Everything logged through the `log_*` methods of this check.
    pub fn logs(&self) -> String {
        lock(&self.log_archive).clone()
    }

    fn archive(&self, level: &str, msg: &str) {
        let line = format!(
            "{:<5} [{}] [{}] {}\n",
            level,
            Utc::now().format("%b %d %H:%M:%S%.3f"),
            self.id,
            msg
        );
        lock(&self.log_archive).push_str(&line);
    }

    pub fn log_debug(&self, msg: impl fmt::Display) {
        let msg = msg.to_string();
        debug!(check = %self.id, "{}", msg);
        self.archive("DEBUG", &msg);
    }

    pub fn log_info(&self, msg: impl fmt::Display) {
        let msg = msg.to_string();
        info!(check = %self.id, "{}", msg);
        self.archive("INFO", &msg);
    }

    pub fn log_warn(&self, msg: impl fmt::Display) {
        let msg = msg.to_string();
        warn!(check = %self.id, "{}", msg);
        self.archive("WARN", &msg);
    }

    pub fn log_error(&self, msg: impl fmt::Display) {
        let msg = msg.to_string();
        error!(check = %self.id, "{}", msg);
        self.archive("ERROR", &msg);
    }

    /// Record findings. Any non-compliant object fails the check; no objects
    /// at all skips it.
    pub fn set_result(&self, compliant: &[ReportObject], non_compliant: &[ReportObject]) {
        let mut status = lock(&self.status);
        if status.result == CheckState::Aborted {
            return;
        }

        let rendered = match result_objects_to_string(compliant, non_compliant) {
            Ok(text) => text,
            Err(e) => {
                self.log_error(format!(
                    "Failed to get result objects string for check {}: {}",
                    self.id, e
                ));
                String::new()
            }
        };
        status.details = rendered.clone();

        // A previous error or panic keeps precedence.
        if status.result == CheckState::Error {
            return;
        }

        if !non_compliant.is_empty() {
            status.result = CheckState::Failed;
            status.failure_reason = rendered;
        } else if compliant.is_empty() {
            self.log_warn(format!(
                "Check {} marked as skipped as both compliant and non-compliant objects lists are empty.",
                self.id
            ));
            status.result = CheckState::Skipped;
            status.failure_reason = "Compliant and non-compliant objects lists are empty.".to_string();
        }
    }

    pub fn set_result_failed(&self, reason: impl Into<String>) {
        self.set_refusable(CheckState::Failed, reason.into());
    }

    pub fn set_result_skipped(&self, reason: impl Into<String>) {
        self.set_refusable(CheckState::Skipped, reason.into());
    }

    fn set_refusable(&self, state: CheckState, reason: String) {
        let mut status = lock(&self.status);
        match status.result {
            CheckState::Aborted => {}
            CheckState::Error => {
                debug!(check = %self.id, "refusing {} over an existing error", state);
            }
            _ => {
                status.result = state;
                status.failure_reason = reason;
            }
        }
    }

    pub fn set_result_error(&self, reason: impl Into<String>) {
        let mut status = lock(&self.status);
        match status.result {
            CheckState::Aborted => {}
            CheckState::Error => {
                self.log_warn(format!("Check {} result was already marked as error.", self.id));
            }
            _ => {
                status.result = CheckState::Error;
                status.failure_reason = reason.into();
            }
        }
    }

    pub fn set_result_aborted(&self, reason: impl Into<String>) {
        let mut status = lock(&self.status);
        if status.result == CheckState::Aborted {
            return;
        }
        status.result = CheckState::Aborted;
        status.failure_reason = reason.into();
    }

    pub(crate) fn set_abort_handle(&self, handle: AbortHandle) {
        *lock(&self.abort_handle) = Some(handle);
    }

    /// Ask the orchestrator to abort the whole run.
    ///
    /// The returned error must be propagated out of the check body:
    ///
    /// ```no_run
    /// # use checkrun::engine::check::Check;
    /// let check = Check::new("sample", ["common"]).with_check_fn(|c| {
    ///     return Err(c.abort("cluster is unreachable"));
    /// });
    /// ```
    pub fn abort(&self, reason: &str) -> anyhow::Error {
        let message = format!("{} called abort: {}", self.id, reason);
        match lock(&self.abort_handle).as_ref() {
            Some(handle) => handle.request(message.clone()),
            None => self.log_warn("abort requested outside of a run"),
        }
        anyhow::Error::new(AbortRequest { message })
    }

    /// Evaluate the skip predicates. Returns the joined reasons when the
    /// check must be skipped.
    pub fn skip_decision(&self) -> Option<String> {
        if self.skip_check_fns.is_empty() {
            return None;
        }

        let mut reasons = Vec::new();
        for (idx, skip_fn) in self.skip_check_fns.iter().enumerate() {
            match invoke_guarded(|| skip_fn()) {
                Ok(Some(reason)) => reasons.push(reason),
                Ok(None) => {}
                Err(panic) => {
                    self.log_error(format!("Skip check function (idx={}) panic'ed: {}", idx, panic));
                    return Some(format!("skipCheckFn (idx={}) panic:\n{}", idx, panic));
                }
            }
        }

        if reasons.is_empty() {
            return None;
        }

        match self.skip_mode {
            SkipMode::Any => Some(reasons.join(", ")),
            SkipMode::All if reasons.len() == self.skip_check_fns.len() => Some(reasons.join(", ")),
            SkipMode::All => None,
        }
    }

    /// Execute before → check → after, stamping start and end times around
    /// the whole sequence. Stops at the first failing phase.
    pub fn run(&self) -> Result<(), CheckError> {
        if let Some(err) = &self.construction_error {
            return Err(CheckError::PriorConstructionError(err.clone()));
        }
        let check_fn = self.check_fn.clone().ok_or_else(|| CheckError::MissingCheckFn {
            id: self.id.clone(),
        })?;

        info!(check = %self.id, labels = ?self.labels, "RUNNING");
        lock(&self.status).start_time = Some(Utc::now());
        let _finish = FinishGuard {
            check: self,
            started: std::time::Instant::now(),
        };

        self.run_phases(&check_fn)
    }

    fn run_phases(&self, check_fn: &CheckFn) -> Result<(), CheckError> {
        if let Some(before) = &self.before_check_fn {
            before(self).map_err(|e| self.phase_error(CheckPhase::Before, e))?;
        }

        check_fn(self).map_err(|e| self.phase_error(CheckPhase::Check, e))?;

        if let Some(after) = &self.after_check_fn {
            after(self).map_err(|e| self.phase_error(CheckPhase::After, e))?;
        }

        Ok(())
    }

    fn phase_error(&self, phase: CheckPhase, cause: anyhow::Error) -> CheckError {
        match cause.downcast::<AbortRequest>() {
            Ok(abort) => CheckError::Aborted(abort),
            Err(cause) => CheckError::Phase {
                id: self.id.clone(),
                phase,
                cause,
            },
        }
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("id", &self.id)
            .field("labels", &self.labels)
            .field("result", &self.result())
            .field("skip_mode", &self.skip_mode)
            .field("timeout", &self.timeout)
            .field("construction_error", &self.construction_error)
            .finish()
    }
}
