//! Guard scenarios and the process-level outcome each one should produce.

use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};

use catch_exit_core::{Fallback, GuardError, OutputChannel, catch_die, catch_exit, hooks};
use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("guard: {0}")]
    Guard(#[from] GuardError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("scenario {0:?} is not supported on this platform")]
    Unsupported(Scenario),
}

/// A guard scenario run inside its own process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Work returns; its output is discarded and the caller prints the value.
    Normal,
    /// Work writes "partial" and exits through the hook-running `exit`.
    PartialExit,
    /// Work writes "partial" and calls `std::process::exit` directly.
    StdExit,
    /// Work exits without writing anything.
    SilentExit,
    /// Work exits; the fallback is a fixed value.
    FixedExit,
    /// Same as `partial-exit`, through the `catch_die` alias.
    DieAlias,
    /// A completed guard followed by one whose work exits.
    Sequential,
    /// Inner work exits inside outer work.
    NestedExit,
    /// Inner work panics; outer work recovers and returns.
    NestedPanic,
    /// Work panics and nothing catches it.
    PanicInMain,
    /// Work is interrupted by SIGTERM.
    Signal,
    /// SIGTERM arrives while a slow fallback is still running.
    SignalDuringFallback,
}

/// Expected process outcome for one scenario under one hook order.
#[derive(Debug, Clone, Serialize)]
pub struct Expectation {
    pub scenario: Scenario,
    /// Value for `CATCH_EXIT_HOOK_ORDER`.
    pub hook_order: &'static str,
    pub stdout: &'static str,
    pub exit_code: i32,
}

const fn expect(
    scenario: Scenario,
    hook_order: &'static str,
    stdout: &'static str,
    exit_code: i32,
) -> Expectation {
    Expectation {
        scenario,
        hook_order,
        stdout,
        exit_code,
    }
}

/// Every scenario with the stdout and status its process must end with.
#[must_use]
pub fn expectations() -> Vec<Expectation> {
    vec![
        expect(Scenario::Normal, "lifo", "result: 7", 0),
        expect(Scenario::PartialExit, "lifo", "recovered: partial", 3),
        expect(Scenario::StdExit, "lifo", "recovered: partial", 4),
        expect(Scenario::SilentExit, "lifo", "nothing captured", 5),
        expect(Scenario::FixedExit, "lifo", "fixed fallback", 6),
        expect(Scenario::DieAlias, "lifo", "recovered: partial", 3),
        expect(Scenario::Sequential, "lifo", "recovered: second", 7),
        expect(Scenario::NestedExit, "lifo", "[outer:outer;[inner:inner]]", 8),
        expect(Scenario::NestedExit, "fifo", "[inner:inner[outer:outer;]]", 8),
        expect(Scenario::NestedPanic, "lifo", "[inner:inner]", 0),
        expect(Scenario::PanicInMain, "lifo", "recovered: partial", 101),
        expect(Scenario::Signal, "lifo", "interrupted: waiting", 143),
        expect(Scenario::SignalDuringFallback, "lifo", "recovered: partial", 3),
    ]
}

fn say(text: &str) -> std::io::Result<()> {
    let mut out = OutputChannel::stdout();
    out.write_all(text.as_bytes())
}

fn recovered(captured: Option<String>) -> String {
    format!("recovered: {}", captured.unwrap_or_default())
}

fn tagged(tag: &'static str) -> Fallback {
    Fallback::compute(move |captured| format!("[{tag}:{}]", captured.unwrap_or_default()))
}

/// Run `scenario` in this process. Most scenarios never return.
///
/// # Errors
///
/// Returns an error if a guard cannot be registered or output cannot be written.
pub fn run(scenario: Scenario) -> Result<(), HarnessError> {
    match scenario {
        Scenario::Normal => {
            let value = catch_exit(
                || -> Result<u32, HarnessError> {
                    say("noise")?;
                    Ok(7)
                },
                "fallback",
            )??;
            say(&format!("result: {value}"))?;
        }
        Scenario::PartialExit => {
            catch_exit(
                || -> Result<(), HarnessError> {
                    say("partial")?;
                    hooks::exit(3)
                },
                Fallback::compute(recovered),
            )??;
        }
        Scenario::StdExit => {
            catch_exit(
                || -> Result<(), HarnessError> {
                    say("partial")?;
                    std::process::exit(4)
                },
                Fallback::compute(recovered),
            )??;
        }
        Scenario::SilentExit => {
            catch_exit(
                || -> Result<(), HarnessError> { hooks::exit(5) },
                Fallback::compute(|captured| match captured {
                    None => "nothing captured".to_string(),
                    Some(text) => format!("captured: {text}"),
                }),
            )??;
        }
        Scenario::FixedExit => {
            catch_exit(
                || -> Result<(), HarnessError> {
                    say("partial")?;
                    hooks::exit(6)
                },
                "fixed fallback",
            )??;
        }
        Scenario::DieAlias => {
            catch_die(
                || -> Result<(), HarnessError> {
                    say("partial")?;
                    hooks::exit(3)
                },
                Fallback::compute(recovered),
            )??;
        }
        Scenario::Sequential => {
            catch_exit(|| say("first"), "first fallback")??;
            catch_exit(
                || -> Result<(), HarnessError> {
                    say("second")?;
                    hooks::exit(7)
                },
                Fallback::compute(recovered),
            )??;
        }
        Scenario::NestedExit => {
            catch_exit(
                || -> Result<(), HarnessError> {
                    say("outer;")?;
                    catch_exit(
                        || -> Result<(), HarnessError> {
                            say("inner")?;
                            hooks::exit(8)
                        },
                        tagged("inner"),
                    )?
                },
                tagged("outer"),
            )??;
        }
        Scenario::NestedPanic => {
            catch_exit(
                || -> Result<(), HarnessError> {
                    say("outer;")?;
                    let inner = catch_unwind(AssertUnwindSafe(|| {
                        catch_exit(
                            || -> Result<(), HarnessError> {
                                say("inner")?;
                                panic!("inner work failed")
                            },
                            tagged("inner"),
                        )
                    }));
                    if let Ok(registered) = inner {
                        registered??;
                    }
                    Ok(())
                },
                tagged("outer"),
            )??;
        }
        Scenario::PanicInMain => {
            catch_exit(
                || -> Result<(), HarnessError> {
                    say("partial")?;
                    panic!("unrecoverable")
                },
                Fallback::compute(recovered),
            )??;
        }
        Scenario::Signal => run_signal()?,
        Scenario::SignalDuringFallback => run_signal_during_fallback()?,
    }
    Ok(())
}

#[cfg(unix)]
fn run_signal() -> Result<(), HarnessError> {
    use catch_exit_core::signals;

    signals::install_default_signal_bridge()?;
    catch_exit(
        || -> Result<(), HarnessError> {
            say("waiting")?;
            signal_hook::low_level::raise(signal_hook::consts::SIGTERM)?;
            loop {
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
        },
        Fallback::compute(|captured| format!("interrupted: {}", captured.unwrap_or_default())),
    )?
}

#[cfg(not(unix))]
fn run_signal() -> Result<(), HarnessError> {
    Err(HarnessError::Unsupported(Scenario::Signal))
}

#[cfg(unix)]
fn run_signal_during_fallback() -> Result<(), HarnessError> {
    use catch_exit_core::signals;

    signals::install_default_signal_bridge()?;
    catch_exit(
        || -> Result<(), HarnessError> {
            say("partial")?;
            hooks::exit(3)
        },
        Fallback::compute(|captured| {
            // The bridge thread tries to exit with 143 while this is running.
            let _ = signal_hook::low_level::raise(signal_hook::consts::SIGTERM);
            std::thread::sleep(std::time::Duration::from_millis(300));
            recovered(captured)
        }),
    )?
}

#[cfg(not(unix))]
fn run_signal_during_fallback() -> Result<(), HarnessError> {
    Err(HarnessError::Unsupported(Scenario::SignalDuringFallback))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scenario_has_an_expectation() {
        let covered: std::collections::HashSet<Scenario> =
            expectations().iter().map(|e| e.scenario).collect();
        for scenario in Scenario::value_variants() {
            assert!(covered.contains(scenario), "{scenario:?} has no expectation");
        }
    }

    #[test]
    fn expectations_serialize_with_kebab_names() {
        let json = serde_json::to_value(expectations()).unwrap();
        assert_eq!(json[1]["scenario"], "partial-exit");
        assert_eq!(json[1]["exit_code"], 3);
    }
}
