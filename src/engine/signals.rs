//! Interruption plumbing for a run.
//!
//! A run is interrupted from three places: the global deadline, an OS
//! SIGINT/SIGTERM, and a check that asks for the whole run to be aborted.
//! Everything that can end a group early is funnelled into one channel of
//! [`RunEvent`]s which the orchestrator waits on with a deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use crate::engine::group::GroupError;

/// Reason recorded on checks when the global deadline fires.
pub const TIMEOUT_REASON: &str = "global time-out";

/// Reason recorded on checks when SIGINT/SIGTERM is received.
pub const INTERRUPT_REASON: &str = "SIGINT/SIGTERM";

/// Events raced by the orchestrator while a group is in flight.
#[derive(Debug)]
pub enum RunEvent {
    /// The group worker returned.
    GroupDone {
        group: usize,
        errors: Vec<GroupError>,
        failed_checks: usize,
    },
    /// A check of the group requested an abort of the whole run.
    Abort { group: usize, reason: String },
    /// The process received SIGINT or SIGTERM.
    Interrupted,
}

/// Cooperative stop flag handed to a group worker.
///
/// The worker polls it between checks; a check already running is never
/// preempted.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Handle a check uses to ask the orchestrator to abort the run.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    group: usize,
    tx: Sender<RunEvent>,
}

impl AbortHandle {
    pub(crate) fn new(group: usize, tx: Sender<RunEvent>) -> Self {
        AbortHandle { group, tx }
    }

    pub(crate) fn request(&self, reason: String) {
        if self
            .tx
            .send(RunEvent::Abort {
                group: self.group,
                reason,
            })
            .is_err()
        {
            debug!("abort requested after the run finished listening");
        }
    }
}

/// Forwards external interrupts into the run that is currently in flight.
///
/// Cloning is cheap; all clones share the same slot. When no run is active
/// an interrupt is dropped.
#[derive(Debug, Clone, Default)]
pub struct Interrupter {
    slot: Arc<Mutex<Option<Sender<RunEvent>>>>,
}

impl Interrupter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an interrupt to the active run, if any. Returns whether a run
    /// was listening.
    pub fn interrupt(&self) -> bool {
        let slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot.as_ref() {
            Some(tx) => tx.send(RunEvent::Interrupted).is_ok(),
            None => false,
        }
    }

    pub(crate) fn attach(&self, tx: Sender<RunEvent>) {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(tx);
    }

    pub(crate) fn detach(&self) {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = None;
    }
}

static SIGNAL_HANDLER: OnceLock<Interrupter> = OnceLock::new();

/// Route SIGINT/SIGTERM to `interrupter`.
///
/// The OS handler can only be installed once per process; later calls keep
/// the first interrupter and return `Ok(false)`.
pub fn install_signal_handler(interrupter: &Interrupter) -> Result<bool, ctrlc::Error> {
    if SIGNAL_HANDLER.get().is_some() {
        return Ok(false);
    }
    let forward = interrupter.clone();
    ctrlc::set_handler(move || {
        warn!("SIGINT/SIGTERM received");
        forward.interrupt();
    })?;
    let _ = SIGNAL_HANDLER.set(interrupter.clone());
    Ok(true)
}
