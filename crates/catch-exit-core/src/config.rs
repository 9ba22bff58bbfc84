//! Runtime configuration.
//!
//! Read from the environment on first use and cached for the life of the
//! process:
//! - `CATCH_EXIT_HOOK_ORDER`: order termination callbacks run in.
//!   `lifo` (default) mirrors C `atexit`; `fifo` runs them in registration order.
//! - `CATCH_EXIT_LOG`: structured log destination. `off` (default), `stderr`,
//!   or a file path that receives JSONL records.
//! - `CATCH_EXIT_LOG_LEVEL`: minimum level written (`info` by default).

use std::path::PathBuf;
use std::sync::OnceLock;

use crate::log::LogLevel;

/// Order in which a registry runs its termination callbacks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookOrder {
    /// Most recently registered first.
    #[default]
    Lifo,
    /// Registration order.
    Fifo,
}

impl HookOrder {
    /// Parse from string (case-insensitive). Unknown values fall back to the default.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "lifo" | "reverse" | "stack" => Self::Lifo,
            "fifo" | "registration" | "queue" => Self::Fifo,
            _ => Self::Lifo,
        }
    }
}

/// Where structured log records go.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum LogTarget {
    #[default]
    Off,
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    /// Parse from string. Anything that is not a known keyword is a path.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "off" | "none" | "0" | "false" => Self::Off,
            "stderr" | "2" | "on" | "1" | "true" => Self::Stderr,
            _ => Self::File(PathBuf::from(trimmed)),
        }
    }
}

/// Process configuration snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Config {
    pub hook_order: HookOrder,
    pub log_target: LogTarget,
    pub log_level: LogLevel,
}

impl Config {
    /// Build a config from a variable lookup. Missing variables keep defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            hook_order: lookup("CATCH_EXIT_HOOK_ORDER")
                .map(|v| HookOrder::from_str_loose(&v))
                .unwrap_or_default(),
            log_target: lookup("CATCH_EXIT_LOG")
                .map(|v| LogTarget::from_str_loose(&v))
                .unwrap_or_default(),
            log_level: lookup("CATCH_EXIT_LOG_LEVEL")
                .map(|v| LogLevel::from_str_loose(&v))
                .unwrap_or_default(),
        }
    }

    /// Build a config from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the process configuration (reads env vars on first call, caches thereafter).
#[must_use]
pub fn config() -> &'static Config {
    GLOBAL_CONFIG.get_or_init(Config::from_env)
}
