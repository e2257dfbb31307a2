//! Campaign driver for the resource leak debugger.
//!
//! Runs a list of client entry points, each under a fresh debugger context
//! with the termination checkpoint armed, and records exit code, leaks and
//! fatal faults per case. Results render as markdown or JSON.

#![forbid(unsafe_code)]

pub mod report;
pub mod runner;

use thiserror::Error;

pub use report::{CampaignReport, CampaignSummary};
pub use runner::{CaseResult, ClientCase, ClientEntry, TestRunner};

/// Errors surfaced while persisting or loading campaign reports.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("report I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("report JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),
}
