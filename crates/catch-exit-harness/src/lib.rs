//! Scenario harness for catch-exit.
//!
//! Guard fallbacks only show their real behavior when a process actually
//! tears down, so every scenario runs inside the `catch-exit-scenario`
//! binary and is judged by what that process leaves on stdout plus its
//! exit status.

pub mod scenario;

pub use scenario::{Expectation, HarnessError, Scenario, expectations, run};
