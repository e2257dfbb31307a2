//! Structured report records for debugger events.
//!
//! Provides:
//! - [`LogEntry`]: one report record with required + optional fields.
//! - [`LogEmitter`]: renders records as text lines or JSONL to stderr, stdout,
//!   a file or a shared in-memory buffer, and keeps the most recent records
//!   in a bounded in-memory history whether or not they were printed.

use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use rldebug_membrane::Severity;
use serde::{Deserialize, Serialize};

/// Level of an emitted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Failure,
}

impl LogLevel {
    /// Severity this level is filtered at.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::Info => Severity::Information,
            Self::Warning => Severity::Warning,
            Self::Failure => Severity::Failure,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        self.severity().label()
    }
}

/// How records are rendered on the report stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogFormat {
    /// One human-readable line per record.
    #[default]
    Text,
    /// One JSON object per line.
    Jsonl,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "json" | "jsonl" | "ndjson" => Self::Jsonl,
            _ => Self::Text,
        }
    }
}

/// One report record.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`, `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,
    pub message: String,

    // Optional
    /// Intercepted libc symbol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Call site of the intercepted operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Acquisition site of the resource involved, when it differs from `location`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Short free-form detail, such as the cap that refused a call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(
        trace_id: impl Into<String>,
        level: LogLevel,
        event: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            message: message.into(),
            symbol: None,
            location: None,
            acquired_at: None,
            size: None,
            address: None,
            errno: None,
            exit_code: None,
            detail: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn with_acquired_at(mut self, location: impl Into<String>) -> Self {
        self.acquired_at = Some(location.into());
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_address(mut self, addr: usize) -> Self {
        self.address = Some(format!("{addr:#x}"));
        self
    }

    #[must_use]
    pub fn with_errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }

    #[must_use]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Render as one human-readable line (no trailing newline).
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut line = format!("Resource analysis: {}", self.level.label());
        if let Some(location) = &self.location {
            line.push_str(" at ");
            line.push_str(location);
        }
        line.push_str(": ");
        line.push_str(&self.message);
        if let Some(acquired_at) = &self.acquired_at {
            line.push_str(&format!(" (block acquired at {acquired_at})"));
        }
        if let Some(detail) = &self.detail {
            line.push_str(&format!(" [{detail}]"));
        }
        line
    }
}

/// In-memory sink whose contents stay readable after it is handed to an emitter.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    /// Written text split into lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Records kept in the history unless configured otherwise.
pub const DEFAULT_HISTORY_CAPACITY: usize = 4096;

/// Writes report records to a sink and keeps the most recent ones.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    format: LogFormat,
    seq: u64,
    run_id: String,
    // Holds up to twice the capacity; only the newest `history_capacity` are visible.
    history: Vec<LogEntry>,
    history_capacity: usize,
    evicted: u64,
}

impl LogEmitter {
    fn with_writer(writer: Box<dyn Write>, run_id: &str, format: LogFormat) -> Self {
        Self {
            writer,
            format,
            seq: 0,
            run_id: run_id.to_string(),
            history: Vec::new(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            evicted: 0,
        }
    }

    /// Keep at most `capacity` records in the history; 0 disables it.
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.set_history_capacity(capacity);
        self
    }

    pub fn set_history_capacity(&mut self, capacity: usize) {
        self.history_capacity = capacity;
        self.compact_history();
    }

    #[must_use]
    pub const fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    /// Create an emitter that writes to stderr.
    #[must_use]
    pub fn to_stderr(run_id: &str, format: LogFormat) -> Self {
        Self::with_writer(Box::new(std::io::stderr()), run_id, format)
    }

    /// Create an emitter that writes to stdout.
    #[must_use]
    pub fn to_stdout(run_id: &str, format: LogFormat) -> Self {
        Self::with_writer(Box::new(std::io::stdout()), run_id, format)
    }

    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str, format: LogFormat) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::with_writer(
            Box::new(std::io::BufWriter::new(file)),
            run_id,
            format,
        ))
    }

    /// Create an emitter writing into a [`SharedBuffer`] (for testing).
    #[must_use]
    pub fn to_buffer(run_id: &str, format: LogFormat) -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::new();
        let emitter = Self::with_writer(Box::new(buffer.clone()), run_id, format);
        (emitter, buffer)
    }

    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }

    /// Generate the next trace ID.
    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{:04}", self.run_id, self.seq)
    }

    /// Record an entry, and write it to the sink when `print` is set.
    pub fn emit_entry(&mut self, mut entry: LogEntry, print: bool) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let result = if print {
            self.write_entry(&entry)
        } else {
            Ok(())
        };
        if self.history_capacity == 0 {
            self.evicted += 1;
        } else {
            self.history.push(entry);
            if self.history.len() >= self.history_capacity.saturating_mul(2) {
                self.compact_history();
            }
        }
        result
    }

    /// Drop everything older than the newest `history_capacity` records.
    fn compact_history(&mut self) {
        let excess = self.history.len().saturating_sub(self.history_capacity);
        if excess > 0 {
            self.history.drain(..excess);
            self.evicted += excess as u64;
        }
    }

    fn write_entry(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = match self.format {
            LogFormat::Text => entry.to_text(),
            LogFormat::Jsonl => entry.to_jsonl().map_err(std::io::Error::other)?,
        };
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }

    /// Write a preformatted text block (leak tables) as-is.
    pub fn write_block(&mut self, text: &str) -> std::io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()
    }

    /// The most recent entries, printed or not, oldest first.
    #[must_use]
    pub fn history(&self) -> &[LogEntry] {
        let start = self.history.len().saturating_sub(self.history_capacity);
        &self.history[start..]
    }

    /// Names of the entries in [`history`](Self::history), in order.
    #[must_use]
    pub fn event_names(&self) -> Vec<&str> {
        self.history().iter().map(|e| e.event.as_str()).collect()
    }

    /// Entries recorded but no longer held in the history.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        let hidden = self.history.len() - self.history().len();
        self.evicted + hidden as u64
    }

    pub fn clear_history(&mut self) {
        self.evicted += self.history.len() as u64;
        self.history.clear();
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEmitter")
            .field("format", &self.format)
            .field("seq", &self.seq)
            .field("run_id", &self.run_id)
            .field("history", &self.history().len())
            .field("history_capacity", &self.history_capacity)
            .field("evicted", &self.evicted())
            .finish_non_exhaustive()
    }
}

/// Current UTC time as an RFC 3339-style string.
#[must_use]
pub fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();
    // Approximate calendar fields; ordering and deltas are what matter here.
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        1970 + secs / 31_557_600,
        (secs % 31_557_600) / 2_629_800 + 1,
        (secs % 2_629_800) / 86400 + 1,
        (secs % 86400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        millis,
    )
}
