//! Termination interception.
//!
//! A client asks to terminate with [`Debugger::exit`]. While a checkpoint is
//! armed the request comes back as an [`ExitRequest`] value, which the client
//! propagates (`?` works) out of its entry function; [`Debugger::run_under_harness`]
//! turns it into the run's exit code. The request is also recorded on the
//! checkpoint, so a client that drops it still ends with the requested code,
//! and any intercepted call it makes afterwards is a fatal fault. With no
//! checkpoint armed the request is a fatal fault unless real process exit has
//! been allowed.

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};

use rldebug_membrane::SourceLocation;
use thiserror::Error;

use crate::debugger::Debugger;
use crate::fault::{Event, FatalFault};

/// Whether termination requests are diverted to a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Checkpoint {
    #[default]
    Unarmed,
    Armed,
    /// Armed, and the client has already requested termination.
    Diverted(ExitRequest),
}

const EXIT_TAG: u16 = 0x0100;

/// A diverted termination request carrying the client's exit code.
///
/// The status is tagged so that exit code 0 is distinguishable from "no
/// request"; only the low byte of the requested code survives.
#[must_use = "return the request from the client entry function"]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
#[error("termination requested (status {status:#06x})")]
pub struct ExitRequest {
    status: u16,
}

impl ExitRequest {
    pub(crate) const fn new(code: i32) -> Self {
        Self {
            status: EXIT_TAG | (code as u8) as u16,
        }
    }

    /// Raw tagged status.
    #[must_use]
    pub const fn status(self) -> u16 {
        self.status
    }

    /// Exit code as the driver reports it: the low byte, sign-extended.
    #[must_use]
    pub const fn code(self) -> i32 {
        fold_exit_code((self.status & 0xFF) as i32)
    }
}

/// Outcome of a client entry function.
pub type ClientResult = Result<i32, ExitRequest>;

/// Fold a status to a signed byte the way a process exit status is read back.
#[must_use]
pub const fn fold_exit_code(code: i32) -> i32 {
    code as u8 as i8 as i32
}

impl Debugger {
    /// A checkpoint is armed and no termination has been requested yet.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.checkpoint == Checkpoint::Armed
    }

    /// Termination request already diverted in the current run, if any.
    #[must_use]
    pub const fn pending_exit(&self) -> Option<ExitRequest> {
        match self.checkpoint {
            Checkpoint::Diverted(request) => Some(request),
            _ => None,
        }
    }

    /// Request process termination.
    ///
    /// Armed: records the request and returns it for the client to
    /// propagate. Unarmed: exits the process if allowed, otherwise raises a
    /// fatal fault.
    pub fn exit(&mut self, code: i32, location: SourceLocation) -> ExitRequest {
        self.sweep(location);
        if self.is_armed() {
            let request = ExitRequest::new(code);
            self.checkpoint = Checkpoint::Diverted(request);
            self.report(Event::ExitDiverted, location, |e| e.with_exit_code(code));
            return request;
        }
        if self.settings.allow_process_exit {
            let _ = self.log.flush();
            std::process::exit(code);
        }
        self.fatal(
            FatalFault::new(Event::ExitOutsideCheckpoint, location)
                .with_detail("fix the code so that it does not call exit()"),
        )
    }

    /// Run a client entry function with the termination checkpoint armed.
    ///
    /// Returns the code of the termination request made during the run, or
    /// the entry's own return value when there was none, folded to a signed
    /// byte either way. The previous checkpoint state is restored even when
    /// a fatal fault unwinds out of the entry.
    pub fn run_under_harness<F>(&mut self, entry: F, args: &[String]) -> i32
    where
        F: FnOnce(&mut Self, &[String]) -> ClientResult,
    {
        let previous = std::mem::replace(&mut self.checkpoint, Checkpoint::Armed);
        let outcome = catch_unwind(AssertUnwindSafe(|| entry(self, args)));
        let diverted = std::mem::replace(&mut self.checkpoint, previous);
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => resume_unwind(payload),
        };
        match (diverted, outcome) {
            (Checkpoint::Diverted(request), _) | (_, Err(request)) => request.code(),
            (_, Ok(code)) => fold_exit_code(code),
        }
    }
}
