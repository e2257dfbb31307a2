//! Stream boundary: fopen and fclose.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use rldebug_membrane::{
    CallKind, DebuggerMetrics, Descriptor, Resource, SourceLocation, StreamHandle, StreamRecord,
};

use crate::debugger::Debugger;
use crate::fault::{Event, FatalFault};

/// Translate a C `fopen` mode string into open options.
///
/// Accepts `r`, `w` or `a` followed by any of `+`, `b`, `x`, `t`, `e`.
/// Returns `None` for anything else.
#[must_use]
pub fn open_options(mode: &str) -> Option<OpenOptions> {
    let mut chars = mode.chars();
    let primary = chars.next()?;
    let mut plus = false;
    let mut exclusive = false;
    for c in chars {
        match c {
            '+' => plus = true,
            'x' => exclusive = true,
            'b' | 't' | 'e' => {}
            _ => return None,
        }
    }
    let mut options = OpenOptions::new();
    match primary {
        'r' => {
            options.read(true).write(plus);
        }
        'w' => {
            options.write(true).read(plus);
            if exclusive {
                options.create_new(true);
            } else {
                options.create(true).truncate(true);
            }
        }
        'a' => {
            options.append(true).read(plus);
            if exclusive {
                options.create_new(true);
            } else {
                options.create(true);
            }
        }
        _ => return None,
    }
    Some(options)
}

impl Debugger {
    /// Open a stream. Only the success budget applies; an OS refusal is a
    /// soft failure carrying the system error text.
    pub fn fopen(
        &mut self,
        path: impl AsRef<Path>,
        mode: &str,
        location: SourceLocation,
    ) -> Option<StreamHandle> {
        let kind = CallKind::Fopen;
        let path = path.as_ref();
        self.sweep(location);
        if let Err(refusal) = self.limits.charge_success(kind) {
            return self.refuse(kind, refusal, location);
        }
        let Some(options) = open_options(mode) else {
            return self.soft_failure(Event::OpenFailed, location, |e| {
                e.with_detail(format!("invalid mode {mode:?}; errno={}", libc::EINVAL))
                    .with_errno(libc::EINVAL)
            });
        };
        let file = match options.open(path) {
            Ok(file) => file,
            Err(err) => {
                let errno = err.raw_os_error().unwrap_or(0);
                return self.soft_failure(Event::OpenFailed, location, |e| {
                    e.with_detail(format!("{}: {err}; errno={errno}", path.display()))
                        .with_errno(errno)
                });
            }
        };

        let Some(handle) = StreamHandle::from_raw(self.next_stream_id) else {
            return self.soft_failure(Event::OpenFailed, location, |e| e);
        };
        self.next_stream_id += 1;
        let name = path.to_string_lossy().into_owned();
        let record = StreamRecord {
            name: name.clone(),
            mode: mode.to_string(),
            handle,
            file,
        };
        self.registry
            .insert(Descriptor::new(Resource::Stream(record), location));
        DebuggerMetrics::inc(&self.metrics.acquisitions);
        self.report(Event::Succeeded(kind), location, |e| e.with_detail(name));
        Some(handle)
    }

    /// Close a stream. `None` and unknown handles are fatal.
    pub fn fclose(
        &mut self,
        stream: Option<StreamHandle>,
        location: SourceLocation,
    ) -> std::io::Result<()> {
        self.sweep(location);
        let Some(handle) = stream else {
            self.fatal(FatalFault::new(Event::NullStreamClose, location));
        };
        let Some(slot) = self.registry.find_stream(handle) else {
            self.fatal(
                FatalFault::new(Event::UnregisteredStreamClose, location)
                    .with_detail(format!("stream #{}", handle.raw())),
            );
        };
        let desc = match self.registry.remove(slot) {
            Ok(desc) => desc,
            Err(err) => self.fatal(
                FatalFault::new(Event::RegistryFault(CallKind::Fclose), location)
                    .with_detail(err.to_string()),
            ),
        };
        let result = match desc.resource {
            Resource::Stream(mut record) => record.file.flush(),
            Resource::Memory(_) => Ok(()),
        };
        DebuggerMetrics::inc(&self.metrics.releases);
        self.report(Event::Succeeded(CallKind::Fclose), location, |e| e);
        result
    }
}
