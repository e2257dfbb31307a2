//! Campaign execution engine.

use std::panic::{AssertUnwindSafe, catch_unwind};

use rldebug_core::{ClientResult, Debugger, FatalAction, FatalFault, LogEmitter, Settings};
use serde::{Deserialize, Serialize};

/// Client entry point: the `main` of the code under test.
pub type ClientEntry = fn(&mut Debugger, &[String]) -> ClientResult;

/// One client program to run under the debugger.
#[derive(Debug, Clone)]
pub struct ClientCase {
    pub name: String,
    pub entry: ClientEntry,
    pub args: Vec<String>,
    /// Exit code the run must produce.
    pub expected_exit: i32,
    /// Require every resource to be released by the end of the run.
    pub expect_clean: bool,
    /// Name of the fatal fault the run must raise, if any.
    pub expected_fault: Option<String>,
}

impl ClientCase {
    /// A case expecting exit code 0 and no leaks.
    #[must_use]
    pub fn new(name: impl Into<String>, entry: ClientEntry) -> Self {
        Self {
            name: name.into(),
            entry,
            args: Vec::new(),
            expected_exit: 0,
            expect_clean: true,
            expected_fault: None,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn expect_exit(mut self, code: i32) -> Self {
        self.expected_exit = code;
        self
    }

    /// Leaks do not fail this case.
    #[must_use]
    pub fn allow_leaks(mut self) -> Self {
        self.expect_clean = false;
        self
    }

    #[must_use]
    pub fn expect_fault(mut self, event: impl Into<String>) -> Self {
        self.expected_fault = Some(event.into());
        self
    }
}

/// Outcome of one client run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_name: String,
    pub passed: bool,
    /// Folded exit code; `None` when a fatal fault ended the run.
    pub exit_code: Option<i32>,
    pub expected_exit: i32,
    /// Resources still registered when the run ended.
    pub leaked_resources: usize,
    pub leaked_bytes: usize,
    pub peak_heap_size: usize,
    /// Event name of the fatal fault that ended the run.
    pub fault: Option<String>,
    /// Every event the debugger recorded, in order.
    pub events: Vec<String>,
    /// Report stream text captured during the run.
    pub output: String,
    /// Why the case failed.
    pub diff: Option<String>,
}

/// Runs client cases, each in a fresh debugger context.
#[derive(Debug, Clone)]
pub struct TestRunner {
    /// Name of the campaign.
    pub campaign: String,
    /// Settings for every context; the fatal action is always `Panic` so a
    /// fatal fault ends one case instead of the whole campaign.
    pub settings: Settings,
}

impl TestRunner {
    #[must_use]
    pub fn new(campaign: impl Into<String>) -> Self {
        Self::with_settings(campaign, Settings::default())
    }

    #[must_use]
    pub fn with_settings(campaign: impl Into<String>, settings: Settings) -> Self {
        Self {
            campaign: campaign.into(),
            settings: Settings {
                fatal_action: FatalAction::Panic,
                ..settings
            },
        }
    }

    /// Run every case and collect the results.
    pub fn run(&self, cases: &[ClientCase]) -> Vec<CaseResult> {
        cases.iter().map(|case| self.run_case(case)).collect()
    }

    /// Run one case in a fresh context.
    pub fn run_case(&self, case: &ClientCase) -> CaseResult {
        let run_id = format!("{}::{}", self.campaign, case.name);
        let (log, buffer) = LogEmitter::to_buffer(&run_id, self.settings.log_format);
        let mut dbg = Debugger::with_log(self.settings, log);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let code = dbg.run_under_harness(case.entry, &case.args);
            let leaked = dbg.summarize(false);
            (code, leaked)
        }));
        let (exit_code, fault) = match outcome {
            Ok((code, _)) => (Some(code), None),
            Err(payload) => match payload.downcast::<FatalFault>() {
                Ok(fault) => (None, Some(fault.name())),
                Err(_) => (None, Some("client_panicked".to_string())),
            },
        };

        // After a fault the registry may be damaged; list it without validating.
        let report = dbg.leak_report();
        let events = dbg
            .log()
            .event_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let diff = judge(case, exit_code, fault.as_deref(), report.resource_count());

        CaseResult {
            case_name: case.name.clone(),
            passed: diff.is_none(),
            exit_code,
            expected_exit: case.expected_exit,
            leaked_resources: report.resource_count(),
            leaked_bytes: report.leaked_bytes,
            peak_heap_size: report.peak_heap_size,
            fault,
            events,
            output: buffer.contents(),
            diff,
        }
    }
}

fn judge(
    case: &ClientCase,
    exit_code: Option<i32>,
    fault: Option<&str>,
    leaked: usize,
) -> Option<String> {
    let mut notes = Vec::new();
    match (case.expected_fault.as_deref(), fault) {
        (Some(expected), Some(actual)) if expected == actual => return None,
        (Some(expected), Some(actual)) => {
            notes.push(format!("expected fault {expected}, got {actual}"));
        }
        (Some(expected), None) => notes.push(format!("expected fault {expected}, run completed")),
        (None, Some(actual)) => notes.push(format!("unexpected fault {actual}")),
        (None, None) => {}
    }
    if let Some(code) = exit_code {
        if case.expected_fault.is_none() && code != case.expected_exit {
            notes.push(format!(
                "exit code: expected {}, got {code}",
                case.expected_exit
            ));
        }
    }
    if case.expect_clean && fault.is_none() && leaked > 0 {
        notes.push(format!("{leaked} resource(s) leaked"));
    }
    (!notes.is_empty()).then(|| notes.join("\n"))
}
