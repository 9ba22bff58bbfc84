//! # catch-exit-core
//!
//! Run a unit of work so that, if the process tears down before the work
//! returns, a fallback value or computation produces the final output
//! instead of whatever the work had written so far.
//!
//! - **Guard** (`guard`): [`catch_exit`] / [`catch_die`] and [`Guard`]
//! - **Termination hooks** (`hooks`): registry bridged to the C runtime's `atexit`
//! - **Output channel** (`output`): stackable capture frames over stdout or memory
//! - **Signals** (`signals`): turns SIGINT/SIGTERM/SIGHUP into hook-running exits
//! - **Configuration** (`config`): environment-driven hook order and logging
//! - **Logging** (`log`): structured JSONL records
//!
//! ```no_run
//! use std::io::Write;
//!
//! use catch_exit_core::{Fallback, OutputChannel, catch_exit, hooks};
//!
//! let value = catch_exit(
//!     || {
//!         let mut out = OutputChannel::stdout();
//!         write!(out, "partial").ok();
//!         hooks::exit(1)
//!     },
//!     Fallback::compute(|captured| format!("recovered: {}", captured.unwrap_or_default())),
//! );
//! # let _: Result<(), _> = value;
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod log;
pub mod output;
#[cfg(unix)]
pub mod signals;

pub use config::{Config, HookOrder, LogTarget};
pub use error::GuardError;
pub use guard::{Completion, Fallback, Guard, catch_die, catch_exit};
pub use hooks::{HookId, HookRegistry, ProcessHooks, RunReport, TerminationHook};
pub use output::{FrameId, OutputChannel, Sink};
