//! The debugger context.
//!
//! One [`Debugger`] owns the registry, the limit table, the settings and
//! the report log. Every intercepted operation takes it by `&mut`, so the
//! single-threaded contract is visible in the types. Dropping the context
//! releases every resource still registered.

use std::fs::File;

use rldebug_membrane::{
    BlockHandle, CallKind, DebuggerMetrics, FatalAction, LimitRefusal, LimitTable,
    MetricsSnapshot, Registry, Severity, SourceLocation, StreamHandle, UNLIMITED, config,
    validate_registry,
};

use crate::exit::Checkpoint;
use crate::fault::{Event, FatalFault};
use crate::signal;
use crate::structured_log::{LogEmitter, LogEntry, LogFormat};

/// Per-context reporting and termination settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Lowest severity printed on the report stream.
    pub severity: Severity,
    pub fatal_action: FatalAction,
    /// Let a termination request with no armed checkpoint really exit.
    pub allow_process_exit: bool,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            severity: config::default_severity(),
            fatal_action: config::default_fatal_action(),
            allow_process_exit: false,
            log_format: LogFormat::Text,
        }
    }
}

/// Resource leak and heap corruption debugger.
#[derive(Debug)]
pub struct Debugger {
    pub(crate) registry: Registry,
    pub(crate) limits: LimitTable,
    pub(crate) settings: Settings,
    pub(crate) metrics: DebuggerMetrics,
    pub(crate) log: LogEmitter,
    pub(crate) checkpoint: Checkpoint,
    pub(crate) next_stream_id: u64,
}

impl Debugger {
    /// A fresh context reporting to stderr with the environment defaults.
    #[must_use]
    pub fn new() -> Self {
        let settings = Settings::default();
        let log = LogEmitter::to_stderr("rldebug", settings.log_format);
        Self::with_log(settings, log)
    }

    /// A fresh context reporting through `log`.
    #[must_use]
    pub fn with_log(settings: Settings, log: LogEmitter) -> Self {
        Self {
            registry: Registry::new(),
            limits: LimitTable::new(),
            settings,
            metrics: DebuggerMetrics::new(),
            log,
            checkpoint: Checkpoint::Unarmed,
            next_stream_id: 1,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    // -- configuration surface ---------------------------------------------

    /// Cap total live heap bytes; `UNLIMITED` removes the cap.
    pub fn set_global_heap_limit(&mut self, limit: usize) {
        self.limits
            .set_global_heap_cap((limit != UNLIMITED).then_some(limit));
    }

    /// While disabled, every heap call is a fatal fault.
    pub fn disable_heap_functions(&mut self, disable: bool) {
        self.limits.set_heap_disabled(disable);
    }

    pub fn set_singleshot_limit(&mut self, kind: CallKind, limit: usize) {
        self.limits.set_single_shot_cap(kind, limit);
    }

    pub fn set_cumulative_limit(&mut self, kind: CallKind, limit: usize) {
        self.limits.set_cumulative_cap(kind, limit);
    }

    /// Let only the first `limit` calls of `kind` succeed.
    pub fn set_success_limit(&mut self, kind: CallKind, limit: usize) {
        self.limits.set_success_cap(kind, limit);
    }

    /// Lift every limit and zero every counter; registered resources stay.
    pub fn reset_limits(&mut self) {
        self.limits.reset();
    }

    pub fn set_reported_severity(&mut self, severity: Severity) {
        self.settings.severity = severity;
    }

    pub fn set_fatal_action(&mut self, action: FatalAction) {
        self.settings.fatal_action = action;
    }

    pub fn allow_process_exit(&mut self, allow: bool) {
        self.settings.allow_process_exit = allow;
    }

    // -- inspection ----------------------------------------------------------

    #[must_use]
    pub const fn limits(&self) -> &LimitTable {
        &self.limits
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Raw registry access.
    ///
    /// Nothing done through this is accounted or re-sealed; it exists so a
    /// test can damage descriptors and watch the detector catch it.
    #[must_use]
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub const fn log(&self) -> &LogEmitter {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut LogEmitter {
        &mut self.log
    }

    #[must_use]
    pub const fn current_heap_size(&self) -> usize {
        self.registry.current_heap_size()
    }

    #[must_use]
    pub const fn peak_heap_size(&self) -> usize {
        self.registry.peak_heap_size()
    }

    /// Payload of a live block.
    #[must_use]
    pub fn block(&self, handle: BlockHandle) -> Option<&[u8]> {
        let slot = self.registry.find_block(handle)?;
        Some(self.registry.get(slot)?.as_memory()?.region.payload())
    }

    /// Mutable payload of a live block.
    pub fn block_mut(&mut self, handle: BlockHandle) -> Option<&mut [u8]> {
        let slot = self.registry.find_block(handle)?;
        Some(
            self.registry
                .get_mut(slot)?
                .as_memory_mut()?
                .region
                .payload_mut(),
        )
    }

    /// The open file behind a live stream.
    pub fn stream_mut(&mut self, handle: StreamHandle) -> Option<&mut File> {
        let slot = self.registry.find_stream(handle)?;
        Some(&mut self.registry.get_mut(slot)?.as_stream_mut()?.file)
    }

    /// Validate the whole registry now, as every intercepted call does first.
    pub fn validate(&mut self, location: SourceLocation) {
        self.sweep(location);
    }

    // -- internals -----------------------------------------------------------

    pub(crate) fn sweep(&mut self, location: SourceLocation) {
        if let Some(request) = self.pending_exit() {
            self.fatal(
                FatalFault::new(Event::CallAfterExit, location)
                    .with_detail(format!("exit({}) was already requested", request.code())),
            );
        }
        DebuggerMetrics::inc(&self.metrics.validations);
        match validate_registry(&self.registry) {
            Ok(checked) => DebuggerMetrics::add(&self.metrics.descriptors_checked, checked as u64),
            Err(corruption) => {
                let event = if corruption.error.is_structural() {
                    Event::HeapBroken
                } else {
                    Event::DataOutOfBounds
                };
                self.fatal(
                    FatalFault::new(event, location)
                        .with_acquired_at(corruption.attributed_site())
                        .with_detail(corruption.error.to_string()),
                );
            }
        }
    }

    /// Record an event; print it when the threshold admits its level.
    pub(crate) fn report(
        &mut self,
        event: Event,
        location: SourceLocation,
        decorate: impl FnOnce(LogEntry) -> LogEntry,
    ) {
        let level = event.level();
        let mut entry = LogEntry::new("", level, event.name(), event.description());
        if let Some(symbol) = event.symbol() {
            entry = entry.with_symbol(symbol);
        }
        if location.is_known() {
            entry = entry.with_location(location.to_string());
        }
        let print = self.settings.severity.admits(level.severity());
        // A broken report stream must not change what the client observes.
        let _ = self.log.emit_entry(decorate(entry), print);
    }

    /// Report a fatal fault and run the fatal action.
    pub(crate) fn fatal(&mut self, fault: FatalFault) -> ! {
        DebuggerMetrics::inc(&self.metrics.fatal_faults);
        let acquired_at = fault.acquired_at;
        let detail = fault.detail.clone();
        self.report(fault.event, fault.location, |entry| {
            let entry = match acquired_at {
                Some(site) => entry.with_acquired_at(site.to_string()),
                None => entry,
            };
            match detail {
                Some(detail) => entry.with_detail(detail),
                None => entry,
            }
        });
        let _ = self.log.flush();
        match self.settings.fatal_action {
            FatalAction::Panic => std::panic::panic_any(fault),
            FatalAction::Signal => signal::raise_fatal(fault.event.signal()),
        }
    }

    /// Map a limit refusal to its tier: a disabled heap is fatal, the rest are soft.
    pub(crate) fn refuse<T>(
        &mut self,
        kind: CallKind,
        refusal: LimitRefusal,
        location: SourceLocation,
    ) -> Option<T> {
        if refusal.is_fatal() {
            self.fatal(FatalFault::new(Event::HeapDisabled(kind), location));
        }
        self.soft_failure(Event::Refused(kind, refusal), location, |e| {
            e.with_detail(refusal.to_string())
        })
    }

    /// Report a soft failure and hand back the empty result.
    pub(crate) fn soft_failure<T>(
        &mut self,
        event: Event,
        location: SourceLocation,
        decorate: impl FnOnce(LogEntry) -> LogEntry,
    ) -> Option<T> {
        DebuggerMetrics::inc(&self.metrics.soft_failures);
        self.report(event, location, decorate);
        None
    }

    pub(crate) fn warning(&mut self, event: Event, location: SourceLocation) {
        DebuggerMetrics::inc(&self.metrics.warnings);
        self.report(event, location, |e| e);
    }

    pub(crate) fn check_heap_enabled(&mut self, kind: CallKind, location: SourceLocation) {
        if self.limits.heap_disabled() {
            self.fatal(FatalFault::new(Event::HeapDisabled(kind), location));
        }
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_debugger() -> Debugger {
        let settings = Settings {
            severity: Severity::Information,
            fatal_action: FatalAction::Panic,
            allow_process_exit: false,
            log_format: LogFormat::Text,
        };
        let (log, _) = LogEmitter::to_buffer("unit", LogFormat::Text);
        Debugger::with_log(settings, log)
    }

    #[test]
    fn global_limit_unlimited_clears_cap() {
        let mut dbg = quiet_debugger();
        dbg.set_global_heap_limit(100);
        assert_eq!(dbg.limits().global_heap_cap(), Some(100));
        dbg.set_global_heap_limit(UNLIMITED);
        assert_eq!(dbg.limits().global_heap_cap(), None);
    }

    #[test]
    fn reset_limits_keeps_settings() {
        let mut dbg = quiet_debugger();
        dbg.set_reported_severity(Severity::Warning);
        dbg.set_success_limit(CallKind::Malloc, 0);
        dbg.disable_heap_functions(true);
        dbg.reset_limits();
        assert!(!dbg.limits().heap_disabled());
        assert_eq!(dbg.settings().severity, Severity::Warning);
        assert_eq!(dbg.limits().descriptor(CallKind::Malloc).success_cap, UNLIMITED);
    }

    #[test]
    fn report_history_ignores_threshold() {
        let mut dbg = quiet_debugger();
        dbg.set_reported_severity(Severity::Quiet);
        dbg.warning(Event::NullRelease, SourceLocation::new("u.c", 1));
        assert_eq!(dbg.log().event_names(), vec!["free_null"]);
        assert_eq!(dbg.metrics().warnings, 1);
    }

    #[test]
    fn empty_registry_sweep_counts_validation() {
        let mut dbg = quiet_debugger();
        dbg.validate(SourceLocation::unknown());
        assert_eq!(dbg.metrics().validations, 1);
        assert_eq!(dbg.metrics().descriptors_checked, 0);
    }
}
