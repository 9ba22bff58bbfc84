//! Error types for guard setup.
//!
//! Only setup can fail. Once `work` runs, nothing is intercepted: panics
//! propagate to the caller unchanged, and teardown failures are logged
//! rather than returned.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    /// The C runtime refused to register the process teardown bridge.
    #[error("atexit refused the teardown bridge (code {code})")]
    HookInstall { code: i32 },
    /// The registry has already been drained for teardown and accepts no
    /// further callbacks.
    #[error("termination hook registry is closed")]
    RegistryClosed,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
