//! Runtime reporting configuration.
//!
//! Two environment variables seed the defaults of every new debugger context:
//! - `RLDEBUG_SEVERITY`: minimum severity printed (`info` default,
//!   `warning`, `failure`, `quiet`). `quiet` suppresses every message;
//!   fatal faults still signal.
//! - `RLDEBUG_FATAL`: what a fatal fault does after it is reported.
//!   `signal` (default) raises `SIGABRT`; `panic` unwinds with a typed
//!   payload so an in-process test can observe it.

use std::sync::OnceLock;

/// Severity of a reported event, and the threshold for printing it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Successful operations and soft failures.
    #[default]
    Information,
    /// Legal but suspicious calls, such as releasing a null handle.
    Warning,
    /// Misuse and corruption.
    Failure,
    /// Threshold only: print nothing.
    Quiet,
}

impl Severity {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "info" | "information" | "all" | "verbose" => Self::Information,
            "warn" | "warning" | "warnings" => Self::Warning,
            "fail" | "failure" | "error" | "errors" => Self::Failure,
            "quiet" | "none" | "off" | "silent" => Self::Quiet,
            _ => Self::Information,
        }
    }

    /// Returns true if an event of `level` is printed under this threshold.
    #[must_use]
    pub fn admits(self, level: Self) -> bool {
        self != Self::Quiet && level >= self
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Information => "INFO",
            Self::Warning => "WARNING",
            Self::Failure => "FAILURE",
            Self::Quiet => "QUIET",
        }
    }
}

/// What happens after a fatal fault has been reported.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalAction {
    /// Raise a fatal signal so a supervising process observes the death.
    #[default]
    Signal,
    /// Unwind with a typed payload; for in-process tests.
    Panic,
}

impl FatalAction {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "panic" | "unwind" | "test" => Self::Panic,
            _ => Self::Signal,
        }
    }
}

static DEFAULT_SEVERITY: OnceLock<Severity> = OnceLock::new();
static DEFAULT_FATAL_ACTION: OnceLock<FatalAction> = OnceLock::new();

/// Reporting threshold for new contexts (reads env var on first call, caches thereafter).
#[must_use]
pub fn default_severity() -> Severity {
    *DEFAULT_SEVERITY.get_or_init(|| {
        std::env::var("RLDEBUG_SEVERITY")
            .map(|v| Severity::from_str_loose(&v))
            .unwrap_or_default()
    })
}

/// Fatal action for new contexts (reads env var on first call, caches thereafter).
#[must_use]
pub fn default_fatal_action() -> FatalAction {
    *DEFAULT_FATAL_ACTION.get_or_init(|| {
        std::env::var("RLDEBUG_FATAL")
            .map(|v| FatalAction::from_str_loose(&v))
            .unwrap_or_default()
    })
}
