//! Reportable events and the fatal fault payload.
//!
//! Every event belongs to one tier:
//! - fatal: misuse or corruption; reported, then the fatal action runs
//! - soft: the call returns an empty result the client must handle
//! - warning: legal but suspicious

use std::fmt;

use rldebug_membrane::{CallKind, LimitRefusal, SourceLocation};

use crate::structured_log::LogLevel;

/// A reportable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// The call completed.
    Succeeded(CallKind),
    /// A quota refused the call.
    Refused(CallKind, LimitRefusal),
    /// Requested size above `MAX_REQUEST` (a negative size cast to unsigned).
    InvalidSize(CallKind),
    /// The platform allocator itself is exhausted.
    TrulyOutOfMemory(CallKind),
    /// The platform refused to open a stream.
    OpenFailed,
    /// Release of a null handle.
    NullRelease,
    /// Heap call while heap functions are disabled.
    HeapDisabled(CallKind),
    UnregisteredRelease,
    UnregisteredResize,
    /// Null source string for a duplication.
    NullSource(CallKind),
    NullStreamClose,
    UnregisteredStreamClose,
    /// Descriptor markers or checksum damaged.
    HeapBroken,
    /// Guard bytes around a block overwritten.
    DataOutOfBounds,
    /// Registry links inconsistent during an update.
    RegistryFault(CallKind),
    /// Termination requested with no checkpoint armed.
    ExitOutsideCheckpoint,
    /// Termination diverted back to the armed checkpoint.
    ExitDiverted,
    /// Intercepted call made after a diverted termination request.
    CallAfterExit,
    /// Leak listing disagrees with the heap counter.
    LeakTotalMismatch,
}

impl Event {
    /// Stable machine-readable event name.
    #[must_use]
    pub fn name(self) -> String {
        match self {
            Self::Succeeded(kind) => format!("{}_successful", kind.symbol()),
            Self::Refused(_, LimitRefusal::HeapDisabled) | Self::HeapDisabled(_) => {
                "heap_functions_disabled".to_string()
            }
            Self::Refused(kind, LimitRefusal::SuccessBudget { .. }) => {
                format!("{}_failed_due_success_limit", kind.symbol())
            }
            Self::Refused(kind, LimitRefusal::SingleShot { .. }) => {
                format!("{}_no_memory_due_singleshot_limit", kind.symbol())
            }
            Self::Refused(kind, LimitRefusal::Cumulative { .. }) => {
                format!("{}_no_memory_due_cumulative_limit", kind.symbol())
            }
            Self::Refused(kind, LimitRefusal::GlobalHeap { .. }) => {
                format!("{}_no_memory_due_limit", kind.symbol())
            }
            Self::InvalidSize(kind) => format!("{}_invalid_size", kind.symbol()),
            Self::TrulyOutOfMemory(kind) => format!("{}_no_memory", kind.symbol()),
            Self::OpenFailed => "fopen_failed".to_string(),
            Self::NullRelease => "free_null".to_string(),
            Self::UnregisteredRelease => "free_invalid_pointer".to_string(),
            Self::UnregisteredResize => "realloc_invalid_pointer".to_string(),
            Self::NullSource(kind) => format!("{}_null", kind.symbol()),
            Self::NullStreamClose => "fclose_null_stream".to_string(),
            Self::UnregisteredStreamClose => "fclose_invalid_stream".to_string(),
            Self::HeapBroken => "heap_broken".to_string(),
            Self::DataOutOfBounds => "heap_data_out_of_bounds".to_string(),
            Self::RegistryFault(_) => "registry_inconsistent".to_string(),
            Self::ExitOutsideCheckpoint => "exit_outside_checkpoint".to_string(),
            Self::ExitDiverted => "exit_diverted".to_string(),
            Self::CallAfterExit => "call_after_exit".to_string(),
            Self::LeakTotalMismatch => "leak_total_mismatch".to_string(),
        }
    }

    /// Short English description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Succeeded(CallKind::Free) => "Memory block released",
            Self::Succeeded(CallKind::Realloc) => "Memory block resized",
            Self::Succeeded(CallKind::Strdup | CallKind::Strndup) => {
                "Memory for the string copy allocated"
            }
            Self::Succeeded(CallKind::Fopen) => "File opened",
            Self::Succeeded(CallKind::Fclose) => "File closed",
            Self::Succeeded(_) => "Memory block of the requested size allocated",
            Self::Refused(_, LimitRefusal::HeapDisabled) | Self::HeapDisabled(_) => {
                "Heap functions are disabled; do not use them"
            }
            Self::Refused(_, LimitRefusal::SuccessBudget { .. }) => {
                "Call failed because the limit of successful calls is exhausted"
            }
            Self::Refused(_, LimitRefusal::SingleShot { .. }) => {
                "Single call allocation limit exceeded"
            }
            Self::Refused(_, LimitRefusal::Cumulative { .. }) => {
                "Cumulative allocation limit exceeded"
            }
            Self::Refused(_, LimitRefusal::GlobalHeap { .. }) => "Out of memory (heap limit)",
            Self::InvalidSize(_) => "Requested size is negative or too large",
            Self::TrulyOutOfMemory(CallKind::Realloc) => {
                "Out of memory; block size left unchanged"
            }
            Self::TrulyOutOfMemory(_) => "Out of memory",
            Self::OpenFailed => "Could not open the file",
            Self::NullRelease => "Attempt to release a NULL pointer",
            Self::UnregisteredRelease => {
                "Attempt to release a block that was never allocated (unknown pointer)"
            }
            Self::UnregisteredResize => {
                "Attempt to resize a block that was never allocated (unknown pointer)"
            }
            Self::NullSource(_) => "Attempt to duplicate a NULL string",
            Self::NullStreamClose => "Attempt to close a NULL stream",
            Self::UnregisteredStreamClose => {
                "Attempt to close a file that was never opened (unknown stream)"
            }
            Self::HeapBroken => {
                "Heap damage detected; an earlier operation wrote outside its memory"
            }
            Self::DataOutOfBounds => "Memory block boundary violation detected",
            Self::RegistryFault(_) => "Resource registry is internally inconsistent",
            Self::ExitOutsideCheckpoint => {
                "exit() was called outside a test checkpoint; it ends the program before the tests can finish"
            }
            Self::ExitDiverted => "exit() returned control to the test driver",
            Self::CallAfterExit => {
                "Call made after exit(); the exit request must be returned to the test driver"
            }
            Self::LeakTotalMismatch => "Leaked byte total disagrees with the heap counter",
        }
    }

    /// Report level of the event.
    #[must_use]
    pub const fn level(self) -> LogLevel {
        match self {
            Self::Succeeded(_)
            | Self::Refused(_, _)
            | Self::InvalidSize(_)
            | Self::TrulyOutOfMemory(_)
            | Self::OpenFailed
            | Self::ExitDiverted => LogLevel::Info,
            Self::NullRelease => LogLevel::Warning,
            _ => LogLevel::Failure,
        }
    }

    /// Fatal events always run the fatal action, whatever the threshold.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self.level(), LogLevel::Failure)
    }

    /// Intercepted symbol the event is attached to, if any.
    #[must_use]
    pub const fn symbol(self) -> Option<&'static str> {
        match self {
            Self::Succeeded(kind)
            | Self::Refused(kind, _)
            | Self::InvalidSize(kind)
            | Self::TrulyOutOfMemory(kind)
            | Self::HeapDisabled(kind)
            | Self::NullSource(kind)
            | Self::RegistryFault(kind) => Some(kind.symbol()),
            Self::OpenFailed => Some(CallKind::Fopen.symbol()),
            Self::NullRelease | Self::UnregisteredRelease => Some(CallKind::Free.symbol()),
            Self::UnregisteredResize => Some(CallKind::Realloc.symbol()),
            Self::NullStreamClose | Self::UnregisteredStreamClose => {
                Some(CallKind::Fclose.symbol())
            }
            Self::ExitOutsideCheckpoint | Self::ExitDiverted => Some(CallKind::Exit.symbol()),
            Self::HeapBroken
            | Self::DataOutOfBounds
            | Self::LeakTotalMismatch
            | Self::CallAfterExit => None,
        }
    }

    /// Signal raised by the `Signal` fatal action.
    #[must_use]
    pub const fn signal(self) -> libc::c_int {
        match self {
            Self::ExitOutsideCheckpoint => libc::SIGTERM,
            _ => libc::SIGABRT,
        }
    }
}

/// Unwind payload of a fatal fault under the `Panic` fatal action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalFault {
    pub event: Event,
    /// Where the fault was observed.
    pub location: SourceLocation,
    /// Acquisition site of the damaged block, for guard damage.
    pub acquired_at: Option<SourceLocation>,
    pub detail: Option<String>,
}

impl FatalFault {
    #[must_use]
    pub const fn new(event: Event, location: SourceLocation) -> Self {
        Self {
            event,
            location,
            acquired_at: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_acquired_at(mut self, site: Option<SourceLocation>) -> Self {
        self.acquired_at = site;
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Event name of the fault.
    #[must_use]
    pub fn name(&self) -> String {
        self.event.name()
    }
}

impl fmt::Display for FatalFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.event.description(), self.location)?;
        if let Some(site) = self.acquired_at {
            write!(f, " (block acquired at {site})")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, " [{detail}]")?;
        }
        Ok(())
    }
}
