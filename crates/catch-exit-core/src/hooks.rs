//! Termination hook registries.
//!
//! [`HookRegistry`] holds callbacks until someone tears it down with
//! [`HookRegistry::shutdown`]. [`ProcessHooks`] is the process-wide registry:
//! its first registration installs a single `atexit` bridge, so the callbacks
//! run on `std::process::exit`, on return from `main`, and after an unhandled
//! panic in `main`.
//!
//! Teardown passes do not overlap. A second teardown waits for the pass in
//! flight, and a second [`exit`] from another thread never returns, so the
//! process cannot end while a callback is still running.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};

use crate::config::{self, HookOrder};
use crate::error::GuardError;
use crate::log::{self, LogEntry, LogLevel};

/// A callback run once at teardown.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a registered callback within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

impl HookId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Something that runs callbacks when the process (or a simulated process)
/// tears down.
pub trait TerminationHook {
    /// Register `callback` to run exactly once at teardown.
    fn register(&self, callback: Callback) -> Result<HookId, GuardError>;
}

impl<T: TerminationHook + ?Sized> TerminationHook for &T {
    fn register(&self, callback: Callback) -> Result<HookId, GuardError> {
        (**self).register(callback)
    }
}

impl<T: TerminationHook + ?Sized> TerminationHook for Arc<T> {
    fn register(&self, callback: Callback) -> Result<HookId, GuardError> {
        (**self).register(callback)
    }
}

/// Summary of one teardown pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Callbacks that ran (including those that panicked).
    pub ran: usize,
    /// Callbacks that panicked. Their panics were contained.
    pub panicked: usize,
}

struct RegistryState {
    pending: Vec<(HookId, Callback)>,
    next_id: u64,
    closed: bool,
    /// Thread running the current teardown pass.
    running: Option<ThreadId>,
}

/// In-memory termination hook registry.
pub struct HookRegistry {
    state: Mutex<RegistryState>,
    idle: Condvar,
    order: HookOrder,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HookRegistry")
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .field("order", &self.order)
            .finish()
    }
}

impl HookRegistry {
    /// Create an empty registry using the configured hook order.
    #[must_use]
    pub fn new() -> Self {
        Self::with_order(config::config().hook_order)
    }

    #[must_use]
    pub fn with_order(order: HookOrder) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                pending: Vec::new(),
                next_id: 1,
                closed: false,
                running: None,
            }),
            idle: Condvar::new(),
            order,
        }
    }

    #[must_use]
    pub fn order(&self) -> HookOrder {
        self.order
    }

    /// Callbacks registered but not yet run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Run every pending callback, including ones registered while running.
    /// The registry stays open afterwards.
    ///
    /// If another thread is already running callbacks, waits for that pass
    /// to finish first. A callback that calls back into its own registry runs
    /// whatever is pending inside the current pass.
    pub fn run_all(&self) -> RunReport {
        let me = std::thread::current().id();
        let owns_pass = {
            let mut state = self.state.lock();
            if state.running == Some(me) {
                false
            } else {
                while state.running.is_some() {
                    self.idle.wait(&mut state);
                }
                state.running = Some(me);
                true
            }
        };

        let report = self.run_batches();

        if owns_pass {
            self.state.lock().running = None;
            self.idle.notify_all();
        }
        report
    }

    fn run_batches(&self) -> RunReport {
        let mut report = RunReport::default();
        loop {
            // Take the batch out so callbacks can register or tear down again
            // without deadlocking on the registry lock.
            let mut batch = std::mem::take(&mut self.state.lock().pending);
            if batch.is_empty() {
                break;
            }
            if self.order == HookOrder::Lifo {
                batch.reverse();
            }
            for (id, callback) in batch {
                report.ran += 1;
                if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    report.panicked += 1;
                    log::emit(
                        LogEntry::new(LogLevel::Error, "hooks.callback_panicked").with_hook(id.0),
                    );
                }
            }
        }
        if report.ran > 0 {
            log::emit(
                LogEntry::new(LogLevel::Debug, "hooks.run").with_details(serde_json::json!({
                    "ran": report.ran,
                    "panicked": report.panicked,
                    "order": format!("{:?}", self.order),
                })),
            );
        }
        report
    }

    /// Run every pending callback and refuse further registrations.
    pub fn shutdown(&self) -> RunReport {
        let report = self.run_all();
        self.state.lock().closed = true;
        report
    }
}

impl TerminationHook for HookRegistry {
    fn register(&self, callback: Callback) -> Result<HookId, GuardError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(GuardError::RegistryClosed);
        }
        let id = HookId(state.next_id);
        state.next_id += 1;
        state.pending.push((id, callback));
        Ok(id)
    }
}

static PROCESS_REGISTRY: OnceLock<HookRegistry> = OnceLock::new();
static BRIDGE_STATUS: OnceLock<i32> = OnceLock::new();
static TEARDOWN_OWNER: OnceLock<ThreadId> = OnceLock::new();

/// Claim process teardown for the calling thread. Only the first claimant
/// ends the process.
fn claim_teardown() -> bool {
    let me = std::thread::current().id();
    *TEARDOWN_OWNER.get_or_init(|| me) == me
}

fn process_registry() -> &'static HookRegistry {
    PROCESS_REGISTRY.get_or_init(HookRegistry::new)
}

extern "C" fn run_process_hooks() {
    // Claimed here too so a later `exit` from another thread parks instead of
    // racing this one. If someone else already owns teardown, `shutdown`
    // waits for their pass.
    let _ = claim_teardown();
    process_registry().shutdown();
}

#[allow(unsafe_code)]
fn install_bridge() -> Result<(), GuardError> {
    let code = *BRIDGE_STATUS.get_or_init(|| {
        // SAFETY: `run_process_hooks` is a plain `extern "C" fn()` with static
        // lifetime. It contains callback panics, so nothing unwinds into libc.
        unsafe { libc::atexit(run_process_hooks) }
    });
    if code == 0 {
        Ok(())
    } else {
        Err(GuardError::HookInstall { code })
    }
}

/// Registers callbacks with the process-wide registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessHooks;

impl ProcessHooks {
    /// Callbacks waiting for process teardown.
    #[must_use]
    pub fn pending(self) -> usize {
        process_registry().pending()
    }
}

impl TerminationHook for ProcessHooks {
    fn register(&self, callback: Callback) -> Result<HookId, GuardError> {
        install_bridge()?;
        process_registry().register(callback)
    }
}

/// Run the process callbacks, then terminate with `status`.
///
/// Only the first thread to tear the process down gets to end it. Any later
/// caller on another thread parks forever while the first one finishes.
pub fn exit(status: i32) -> ! {
    if !claim_teardown() {
        log::emit(
            LogEntry::new(LogLevel::Debug, "process.exit_deferred").with_exit_code(status),
        );
        loop {
            std::thread::park();
        }
    }
    log::emit(LogEntry::new(LogLevel::Debug, "process.exit").with_exit_code(status));
    process_registry().shutdown();
    // The atexit bridge runs again inside `std::process::exit` and finds the
    // registry closed and empty.
    std::process::exit(status)
}
