//! Structured JSONL logging.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes records to a file, stderr, or an in-memory buffer.
//! - [`emit`]: writes through the process emitter built from [`crate::config`].
//!
//! Records are flushed line by line. Most interesting events happen during
//! process teardown, when nothing else gets a chance to flush.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{self, LogTarget};

/// Severity level for log entries.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from string (case-insensitive). Unknown values map to `Info`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// How a guarded invocation ended, as far as the log is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// `work` returned normally.
    Completed,
    /// Teardown found `work` unfinished and emitted the fallback.
    Fallback,
    /// Teardown found `work` finished; the callback did nothing.
    Skipped,
}

/// Structured log record.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Bytes held by the capture frame when it was drained or discarded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: String::new(),
            level,
            event: event.into(),
            guard_id: None,
            hook_id: None,
            outcome: None,
            captured_bytes: None,
            exit_code: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_guard(mut self, guard_id: u64) -> Self {
        self.guard_id = Some(guard_id);
        self
    }

    #[must_use]
    pub fn with_hook(mut self, hook_id: u64) -> Self {
        self.hook_id = Some(hook_id);
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_captured_bytes(mut self, bytes: usize) -> Self {
        self.captured_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    /// Set free-form details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse one JSONL line back into an entry.
    pub fn from_jsonl(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

enum Destination {
    Writer(Box<dyn Write + Send>),
    Buffer(Arc<Mutex<Vec<u8>>>),
}

/// Writes structured JSONL log entries.
pub struct LogEmitter {
    destination: Destination,
    min_level: LogLevel,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Create an emitter that appends to a file.
    pub fn to_file(path: &Path, min_level: LogLevel) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::with_destination(
            Destination::Writer(Box::new(file)),
            min_level,
        ))
    }

    /// Create an emitter that writes to stderr.
    #[must_use]
    pub fn to_stderr(min_level: LogLevel) -> Self {
        Self::with_destination(
            Destination::Writer(Box::new(std::io::stderr())),
            min_level,
        )
    }

    /// Create an emitter that writes to an in-memory buffer (for testing).
    #[must_use]
    pub fn to_buffer(min_level: LogLevel) -> Self {
        Self::with_destination(
            Destination::Buffer(Arc::new(Mutex::new(Vec::new()))),
            min_level,
        )
    }

    fn with_destination(destination: Destination, min_level: LogLevel) -> Self {
        Self {
            destination,
            min_level,
            seq: 0,
            run_id: std::process::id().to_string(),
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("catch-exit::{}::{:03}", self.run_id, self.seq)
    }

    /// Write `entry` if its level passes the filter. Returns whether it was written.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<bool> {
        if entry.level < self.min_level {
            return Ok(false);
        }
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        match &mut self.destination {
            Destination::Writer(writer) => {
                writeln!(writer, "{line}")?;
                writer.flush()?;
            }
            Destination::Buffer(buf) => {
                let mut buf = buf.lock();
                buf.extend_from_slice(line.as_bytes());
                buf.push(b'\n');
            }
        }
        Ok(true)
    }

    /// Lines written so far when this emitter writes to a buffer.
    #[must_use]
    pub fn buffered_lines(&self) -> Vec<String> {
        match &self.destination {
            Destination::Buffer(buf) => String::from_utf8_lossy(&buf.lock())
                .lines()
                .map(str::to_string)
                .collect(),
            Destination::Writer(_) => Vec::new(),
        }
    }
}

static PROCESS_EMITTER: OnceLock<Option<Mutex<LogEmitter>>> = OnceLock::new();

fn process_emitter() -> Option<&'static Mutex<LogEmitter>> {
    PROCESS_EMITTER
        .get_or_init(|| {
            let cfg = config::config();
            match &cfg.log_target {
                LogTarget::Off => None,
                LogTarget::Stderr => Some(Mutex::new(LogEmitter::to_stderr(cfg.log_level))),
                LogTarget::File(path) => match LogEmitter::to_file(path, cfg.log_level) {
                    Ok(emitter) => Some(Mutex::new(emitter)),
                    Err(err) => {
                        eprintln!(
                            "catch-exit: cannot open log file {}: {err}; logging disabled",
                            path.display()
                        );
                        None
                    }
                },
            }
        })
        .as_ref()
}

/// Write `entry` through the process emitter. A no-op when logging is off.
pub fn emit(entry: LogEntry) {
    let Some(emitter) = process_emitter() else {
        return;
    };
    // Teardown may re-enter through a callback; never block on ourselves.
    let Some(mut emitter) = emitter.try_lock() else {
        return;
    };
    // Logging must never take teardown down with it.
    let _ = emitter.emit_entry(entry);
}

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
    )
}

// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_and_parse() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::from_str_loose("WARNING"), LogLevel::Warn);
        assert_eq!(LogLevel::from_str_loose("nope"), LogLevel::Info);
    }

    #[test]
    fn entry_omits_unset_optionals() {
        let line = LogEntry::new(LogLevel::Info, "guard.completed")
            .with_guard(3)
            .with_outcome(Outcome::Completed)
            .to_jsonl()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "guard.completed");
        assert_eq!(value["guard_id"], 3);
        assert_eq!(value["outcome"], "completed");
        assert!(value.get("hook_id").is_none());
        assert!(value.get("details").is_none());
    }

    #[test]
    fn buffer_emitter_filters_by_level() {
        let mut emitter = LogEmitter::to_buffer(LogLevel::Info);
        assert!(!emitter.emit_entry(LogEntry::new(LogLevel::Debug, "noise")).unwrap());
        assert!(emitter.emit_entry(LogEntry::new(LogLevel::Warn, "kept")).unwrap());

        let lines = emitter.buffered_lines();
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["event"], "kept");
        assert!(value["trace_id"].as_str().unwrap().ends_with("::001"));
    }

    #[test]
    fn emitted_records_parse_back_into_entries() {
        let mut emitter = LogEmitter::to_buffer(LogLevel::Trace);
        emitter
            .emit_entry(
                LogEntry::new(LogLevel::Info, "guard.fallback")
                    .with_guard(9)
                    .with_outcome(Outcome::Fallback)
                    .with_captured_bytes(7)
                    .with_details(serde_json::json!({ "write_error": "closed" })),
            )
            .unwrap();
        emitter
            .emit_entry(LogEntry::new(LogLevel::Debug, "process.exit").with_exit_code(3))
            .unwrap();

        let entries: Vec<LogEntry> = emitter
            .buffered_lines()
            .iter()
            .map(|line| LogEntry::from_jsonl(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);

        let fallback = &entries[0];
        assert_eq!(fallback.level, LogLevel::Info);
        assert_eq!(fallback.event, "guard.fallback");
        assert_eq!(fallback.guard_id, Some(9));
        assert_eq!(fallback.outcome, Some(Outcome::Fallback));
        assert_eq!(fallback.captured_bytes, Some(7));
        assert_eq!(fallback.hook_id, None);
        assert_eq!(fallback.details.as_ref().unwrap()["write_error"], "closed");
        assert!(fallback.trace_id.ends_with("::001"));

        let exit = &entries[1];
        assert_eq!(exit.level, LogLevel::Debug);
        assert_eq!(exit.exit_code, Some(3));
        assert!(exit.trace_id.ends_with("::002"));
        assert_eq!(exit.timestamp.len(), "1970-01-01T00:00:00.000Z".len());
    }

    #[test]
    fn unknown_level_is_rejected_when_parsing() {
        let line = r#"{"timestamp":"t","trace_id":"x","level":"loud","event":"e"}"#;
        assert!(LogEntry::from_jsonl(line).is_err());
    }

    #[test]
    fn civil_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
    }
}
