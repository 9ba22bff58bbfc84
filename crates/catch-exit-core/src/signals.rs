//! Route termination signals through the process hooks.
//!
//! By default SIGINT and SIGTERM kill the process without running `atexit`
//! handlers, so guarded work interrupted by a signal would never get its
//! fallback. The bridge listens on a background thread and turns the first
//! delivered signal into [`hooks::exit`] with the conventional `128 + signo`
//! status.

use std::thread::JoinHandle;

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::error::GuardError;
use crate::hooks;
use crate::log::{self, LogEntry, LogLevel};

/// Signals bridged by [`install_default_signal_bridge`].
pub const DEFAULT_SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

/// Exit status used after `signal` is delivered.
#[must_use]
pub const fn exit_status_for(signal: i32) -> i32 {
    128 + signal
}

/// Start listening for `signals`. The first one delivered tears the process
/// down through the registered hooks.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub fn install_signal_bridge(signals: &[i32]) -> Result<JoinHandle<()>, GuardError> {
    let mut listener = Signals::new(signals)?;
    let handle = std::thread::Builder::new()
        .name("catch-exit-signals".to_string())
        .spawn(move || {
            if let Some(signal) = listener.forever().next() {
                let status = exit_status_for(signal);
                log::emit(
                    LogEntry::new(LogLevel::Info, "signal.received")
                        .with_exit_code(status)
                        .with_details(serde_json::json!({ "signal": signal })),
                );
                hooks::exit(status);
            }
        })?;
    Ok(handle)
}

/// [`install_signal_bridge`] for [`DEFAULT_SIGNALS`].
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub fn install_default_signal_bridge() -> Result<JoinHandle<()>, GuardError> {
    install_signal_bridge(&DEFAULT_SIGNALS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_shell_convention() {
        assert_eq!(exit_status_for(SIGINT), 130);
        assert_eq!(exit_status_for(SIGTERM), 143);
    }
}
