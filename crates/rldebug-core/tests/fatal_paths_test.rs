#![allow(unsafe_code)]

use std::panic::{AssertUnwindSafe, catch_unwind};

use rldebug_core::{
    BlockHandle, CallKind, Debugger, Event, FatalAction, FatalFault, LogEmitter, LogFormat,
    Settings, Severity, SharedBuffer, SourceLocation, StreamHandle,
};

fn debugger(severity: Severity) -> (Debugger, SharedBuffer) {
    let settings = Settings {
        severity,
        fatal_action: FatalAction::Panic,
        allow_process_exit: false,
        log_format: LogFormat::Text,
    };
    let (log, buffer) = LogEmitter::to_buffer("fatal", LogFormat::Text);
    (Debugger::with_log(settings, log), buffer)
}

/// Run `op` and return the fatal fault it raised.
fn expect_fatal(dbg: &mut Debugger, op: impl FnOnce(&mut Debugger)) -> FatalFault {
    let payload = catch_unwind(AssertUnwindSafe(|| op(dbg))).expect_err("operation must be fatal");
    match payload.downcast::<FatalFault>() {
        Ok(fault) => *fault,
        Err(_) => panic!("unwound with something other than a FatalFault"),
    }
}

const ACQUIRED: SourceLocation = SourceLocation::new("victim.c", 21);
const CHECKED: SourceLocation = SourceLocation::new("victim.c", 30);

#[test]
fn in_bounds_writes_validate_cleanly() {
    let (mut dbg, _) = debugger(Severity::Quiet);
    let h = dbg.malloc(16, ACQUIRED).expect("malloc");
    dbg.block_mut(h).expect("live").fill(0x41);
    // SAFETY: offsets 0 and 15 are inside the 16-byte payload.
    unsafe {
        h.as_ptr().write(1);
        h.as_ptr().add(15).write(2);
    }
    dbg.validate(CHECKED);
    assert_eq!(dbg.metrics().fatal_faults, 0);
}

#[test]
fn write_past_the_end_names_the_acquisition_site() {
    let (mut dbg, buffer) = debugger(Severity::Quiet);
    let h = dbg.malloc(16, ACQUIRED).expect("malloc");
    // SAFETY: offset 16 is the first tail guard byte, inside the same allocation.
    unsafe { h.as_ptr().add(16).write(0) };

    let fault = expect_fatal(&mut dbg, |d| d.validate(CHECKED));
    assert_eq!(fault.event, Event::DataOutOfBounds);
    assert_eq!(fault.location, CHECKED);
    assert_eq!(fault.acquired_at, Some(ACQUIRED));
    // Quiet suppresses the message, never the fault.
    assert!(buffer.contents().is_empty());
    assert_eq!(dbg.log().event_names(), vec!["malloc_successful", "heap_data_out_of_bounds"]);
}

#[test]
fn write_before_the_start_is_detected_by_the_next_call() {
    let (mut dbg, buffer) = debugger(Severity::Failure);
    let h = dbg.malloc(8, ACQUIRED).expect("malloc");
    // SAFETY: one byte before the payload is the last head guard byte.
    unsafe { h.as_ptr().sub(1).write(0xEE) };

    let fault = expect_fatal(&mut dbg, |d| {
        let _ = d.malloc(4, CHECKED);
    });
    assert_eq!(fault.event, Event::DataOutOfBounds);
    assert_eq!(fault.acquired_at, Some(ACQUIRED));
    let text = buffer.contents();
    assert!(text.contains("FAILURE"));
    assert!(text.contains("block acquired at victim.c:21"));
}

#[test]
fn damaged_descriptor_is_a_broken_heap() {
    let (mut dbg, _) = debugger(Severity::Quiet);
    let h = dbg.malloc(8, ACQUIRED).expect("malloc");
    let slot = dbg.registry().find_block(h).expect("registered");
    dbg.registry_mut().get_mut(slot).expect("slot").location.line += 1;

    let fault = expect_fatal(&mut dbg, |d| d.free(Some(h), CHECKED));
    assert_eq!(fault.event, Event::HeapBroken);
    assert_eq!(fault.acquired_at, None);
}

#[test]
fn smashed_marker_is_a_broken_heap() {
    let (mut dbg, _) = debugger(Severity::Quiet);
    let _ = dbg.malloc(8, ACQUIRED);
    let h = dbg.malloc(8, ACQUIRED).expect("malloc");
    let slot = dbg.registry().find_block(h).expect("registered");
    dbg.registry_mut().get_mut(slot).expect("slot").trailing_marker = 0;

    let fault = expect_fatal(&mut dbg, |d| {
        let _ = d.summarize(false);
    });
    assert_eq!(fault.event, Event::HeapBroken);
}

#[test]
fn releasing_a_foreign_handle_is_fatal() {
    let (mut dbg, _) = debugger(Severity::Quiet);
    let mut local = [0u8; 8];
    let foreign = BlockHandle::from_ptr(local.as_mut_ptr());

    let fault = expect_fatal(&mut dbg, |d| d.free(foreign, CHECKED));
    assert_eq!(fault.event, Event::UnregisteredRelease);
    let fault = expect_fatal(&mut dbg, |d| {
        let _ = d.realloc(foreign, 32, CHECKED);
    });
    assert_eq!(fault.event, Event::UnregisteredResize);
    assert_eq!(dbg.metrics().soft_failures, 0);
}

#[test]
fn double_free_is_fatal() {
    let (mut dbg, _) = debugger(Severity::Quiet);
    let h = dbg.malloc(8, ACQUIRED);
    dbg.free(h, CHECKED);
    let fault = expect_fatal(&mut dbg, |d| d.free(h, CHECKED));
    assert_eq!(fault.event, Event::UnregisteredRelease);
}

#[test]
fn closing_null_or_unknown_streams_is_fatal() {
    let (mut dbg, _) = debugger(Severity::Quiet);
    let fault = expect_fatal(&mut dbg, |d| {
        let _ = d.fclose(None, CHECKED);
    });
    assert_eq!(fault.event, Event::NullStreamClose);

    let unknown = StreamHandle::from_raw(99);
    let fault = expect_fatal(&mut dbg, |d| {
        let _ = d.fclose(unknown, CHECKED);
    });
    assert_eq!(fault.event, Event::UnregisteredStreamClose);
    assert_eq!(fault.name(), "fclose_invalid_stream");
}

#[test]
fn duplicating_a_null_string_is_fatal() {
    let (mut dbg, _) = debugger(Severity::Quiet);
    let fault = expect_fatal(&mut dbg, |d| {
        let _ = d.strdup(None, CHECKED);
    });
    assert_eq!(fault.event, Event::NullSource(CallKind::Strdup));
    let fault = expect_fatal(&mut dbg, |d| {
        let _ = d.strndup(None, 4, CHECKED);
    });
    assert_eq!(fault.name(), "strndup_null");
}

#[test]
fn disabled_heap_is_fatal_for_every_heap_call() {
    let (mut dbg, _) = debugger(Severity::Quiet);
    let h = dbg.malloc(8, ACQUIRED);
    dbg.disable_heap_functions(true);

    let fault = expect_fatal(&mut dbg, |d| {
        let _ = d.malloc(1, CHECKED);
    });
    assert_eq!(fault.event, Event::HeapDisabled(CallKind::Malloc));
    let fault = expect_fatal(&mut dbg, |d| d.free(h, CHECKED));
    assert_eq!(fault.event, Event::HeapDisabled(CallKind::Free));
    // Checked before the null warning.
    let fault = expect_fatal(&mut dbg, |d| d.free(None, CHECKED));
    assert_eq!(fault.event, Event::HeapDisabled(CallKind::Free));
    let fault = expect_fatal(&mut dbg, |d| {
        let _ = d.realloc(h, 64, CHECKED);
    });
    assert_eq!(fault.event, Event::HeapDisabled(CallKind::Realloc));

    dbg.disable_heap_functions(false);
    dbg.free(h, CHECKED);
    assert_eq!(dbg.summarize(false), 0);
}

#[test]
fn termination_outside_a_checkpoint_is_fatal() {
    let (mut dbg, _) = debugger(Severity::Quiet);
    assert!(!dbg.is_armed());
    let fault = expect_fatal(&mut dbg, |d| {
        let _ = d.exit(7, CHECKED);
    });
    assert_eq!(fault.event, Event::ExitOutsideCheckpoint);
    assert_eq!(fault.event.signal(), libc::SIGTERM);
}
