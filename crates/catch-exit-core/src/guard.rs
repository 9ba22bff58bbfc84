//! Guarded execution.
//!
//! [`Guard::run`] runs a unit of work with its output captured. If the work
//! returns, the capture is thrown away and the value handed back. If the
//! process tears down first, the termination callback replaces whatever the
//! work had written with the fallback's output.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::GuardError;
use crate::hooks::{ProcessHooks, TerminationHook};
use crate::log::{self, LogEntry, LogLevel, Outcome};
use crate::output::{FrameId, OutputChannel};

/// Replacement output for work that never returned.
pub enum Fallback {
    /// Emitted as-is.
    Value(String),
    /// Called with the captured text, or `None` if nothing was captured.
    Compute(Box<dyn FnOnce(Option<String>) -> String + Send + 'static>),
}

impl Fallback {
    #[must_use]
    pub fn value(value: impl Into<String>) -> Self {
        Self::Value(value.into())
    }

    #[must_use]
    pub fn compute<F>(f: F) -> Self
    where
        F: FnOnce(Option<String>) -> String + Send + 'static,
    {
        Self::Compute(Box::new(f))
    }

    /// Produce the final output for `captured`.
    #[must_use]
    pub fn resolve(self, captured: Option<String>) -> String {
        match self {
            Self::Value(value) => value,
            Self::Compute(f) => f(captured),
        }
    }
}

impl std::fmt::Debug for Fallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

impl From<String> for Fallback {
    fn from(value: String) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Fallback {
    fn from(value: &str) -> Self {
        Self::Value(value.to_string())
    }
}

/// Whether guarded work has returned.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    #[default]
    Pending,
    Completed,
}

#[derive(Debug, Default)]
struct Invocation {
    completion: Completion,
    frame: Option<FrameId>,
}

static NEXT_GUARD_ID: AtomicU64 = AtomicU64::new(1);

/// Runs work under a termination hook, capturing its output on a channel.
#[derive(Debug, Clone)]
pub struct Guard<H> {
    hooks: H,
    channel: OutputChannel,
}

impl Guard<ProcessHooks> {
    /// Guard over the process hooks and the process stdout channel.
    #[must_use]
    pub fn process() -> Self {
        Self::new(ProcessHooks, OutputChannel::stdout())
    }
}

impl<H: TerminationHook> Guard<H> {
    #[must_use]
    pub fn new(hooks: H, channel: OutputChannel) -> Self {
        Self { hooks, channel }
    }

    /// The channel `work` should write to for its output to be captured.
    #[must_use]
    pub fn channel(&self) -> &OutputChannel {
        &self.channel
    }

    /// Run `work`, returning its value.
    ///
    /// If teardown happens before `work` returns, whatever it wrote to the
    /// channel is replaced by `fallback`'s output. A panic in `work`
    /// propagates unchanged and leaves the fallback armed.
    ///
    /// # Errors
    ///
    /// Fails only if the termination callback cannot be registered, in
    /// which case `work` is not run.
    pub fn run<T>(
        &self,
        work: impl FnOnce() -> T,
        fallback: impl Into<Fallback>,
    ) -> Result<T, GuardError> {
        let guard_id = NEXT_GUARD_ID.fetch_add(1, Ordering::Relaxed);
        let invocation = Arc::new(Mutex::new(Invocation::default()));

        let hook_id = self.hooks.register(teardown_callback(
            guard_id,
            Arc::clone(&invocation),
            self.channel.clone(),
            fallback.into(),
        ))?;
        log::emit(
            LogEntry::new(LogLevel::Debug, "guard.registered")
                .with_guard(guard_id)
                .with_hook(hook_id.get()),
        );

        let frame = self.channel.begin();
        invocation.lock().frame = Some(frame);

        let value = work();

        let dropped = self.channel.discard(frame).unwrap_or(0);
        invocation.lock().completion = Completion::Completed;
        log::emit(
            LogEntry::new(LogLevel::Debug, "guard.completed")
                .with_guard(guard_id)
                .with_outcome(Outcome::Completed)
                .with_captured_bytes(dropped),
        );
        Ok(value)
    }

    /// Same as [`Guard::run`].
    pub fn run_die<T>(
        &self,
        work: impl FnOnce() -> T,
        fallback: impl Into<Fallback>,
    ) -> Result<T, GuardError> {
        self.run(work, fallback)
    }
}

fn teardown_callback(
    guard_id: u64,
    invocation: Arc<Mutex<Invocation>>,
    channel: OutputChannel,
    fallback: Fallback,
) -> Box<dyn FnOnce() + Send + 'static> {
    Box::new(move || {
        let frame = {
            let invocation = invocation.lock();
            if invocation.completion == Completion::Completed {
                log::emit(
                    LogEntry::new(LogLevel::Trace, "guard.skipped")
                        .with_guard(guard_id)
                        .with_outcome(Outcome::Skipped),
                );
                return;
            }
            invocation.frame
        };

        let captured = frame
            .and_then(|frame| channel.drain(frame))
            .filter(|text| !text.is_empty());
        let captured_bytes = captured.as_ref().map_or(0, String::len);
        let output = fallback.resolve(captured);

        let mut out = &channel;
        let written = out.write_all(output.as_bytes()).and_then(|()| out.flush());

        let mut entry = LogEntry::new(LogLevel::Info, "guard.fallback")
            .with_guard(guard_id)
            .with_outcome(Outcome::Fallback)
            .with_captured_bytes(captured_bytes);
        if let Err(err) = written {
            entry = entry.with_details(serde_json::json!({ "write_error": err.to_string() }));
        }
        log::emit(entry);
    })
}

/// Run `work` under the process hooks, capturing what it writes to
/// [`OutputChannel::stdout`].
///
/// # Errors
///
/// See [`Guard::run`].
pub fn catch_exit<T>(
    work: impl FnOnce() -> T,
    fallback: impl Into<Fallback>,
) -> Result<T, GuardError> {
    Guard::process().run(work, fallback)
}

/// Same as [`catch_exit`].
///
/// # Errors
///
/// See [`Guard::run`].
pub fn catch_die<T>(
    work: impl FnOnce() -> T,
    fallback: impl Into<Fallback>,
) -> Result<T, GuardError> {
    catch_exit(work, fallback)
}
