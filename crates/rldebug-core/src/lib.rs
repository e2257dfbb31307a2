//! # rldebug-core
//!
//! Intercepted heap, string, stream and termination calls for the resource
//! leak debugger.
//!
//! A [`Debugger`] is the explicit context behind every call: it validates
//! the whole registry first, applies the configured quotas, records the
//! resource and reports the outcome. Misuse and corruption are fatal
//! faults; quota refusals come back as `None` for the client to handle.
//!
//! ```no_run
//! use rldebug_core::{Debugger, location};
//!
//! let mut dbg = Debugger::new();
//! let code = dbg.run_under_harness(
//!     |dbg, _args| {
//!         let block = dbg.malloc(64, location!());
//!         dbg.free(block, location!());
//!         Err(dbg.exit(3, location!()))
//!     },
//!     &[],
//! );
//! assert_eq!(code, 3);
//! assert_eq!(dbg.summarize(false), 0);
//! ```

#![deny(unsafe_code)]

pub mod debugger;
pub mod exit;
pub mod fault;
pub mod malloc;
pub mod report;
mod signal;
pub mod stdio;
pub mod structured_log;

pub use debugger::{Debugger, Settings};
pub use exit::{Checkpoint, ClientResult, ExitRequest, fold_exit_code};
pub use fault::{Event, FatalFault};
pub use malloc::{AllocKind, DupKind};
pub use report::{LeakReport, LeakedBlock, LeakedStream};
pub use rldebug_membrane::{
    BlockHandle, CallKind, FatalAction, MetricsSnapshot, Severity, SourceLocation, StreamHandle,
    UNLIMITED, location,
};
pub use stdio::open_options;
pub use structured_log::{LogEmitter, LogEntry, LogFormat, LogLevel, SharedBuffer};
