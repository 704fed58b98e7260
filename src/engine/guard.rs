//! Guarded invocation of collaborator callbacks.
//!
//! Hooks, skip predicates and check bodies are arbitrary code. A panic in any
//! of them is caught at the call boundary and turned into a [`PanicReport`]
//! carrying the panic message and the stack trace of the panic site.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

thread_local! {
    static LAST_PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// A recovered panic.
#[derive(Debug, Clone)]
pub struct PanicReport {
    pub message: String,
    pub stack_trace: String,
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.message, self.stack_trace)
    }
}

fn install_trace_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            LAST_PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `f`, converting a panic into a [`PanicReport`].
pub fn invoke_guarded<T>(f: impl FnOnce() -> T) -> Result<T, PanicReport> {
    install_trace_hook();
    LAST_PANIC_TRACE.with(|slot| slot.borrow_mut().take());

    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let stack_trace = LAST_PANIC_TRACE
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| Backtrace::force_capture().to_string());
        PanicReport {
            message: payload_message(payload.as_ref()),
            stack_trace,
        }
    })
}
