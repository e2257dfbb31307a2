//! Report generation for campaign results.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::HarnessError;
use crate::runner::CaseResult;

/// Aggregate of one campaign's case results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Bytes leaked across every case.
    pub leaked_bytes: usize,
    pub results: Vec<CaseResult>,
}

impl CampaignSummary {
    #[must_use]
    pub fn from_results(results: Vec<CaseResult>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let leaked_bytes = results.iter().map(|r| r.leaked_bytes).sum();
        Self {
            total,
            passed,
            failed: total - passed,
            leaked_bytes,
            results,
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// A campaign report: title, timestamp and summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    pub title: String,
    /// Timestamp (UTC).
    pub timestamp: String,
    pub summary: CampaignSummary,
}

impl CampaignReport {
    #[must_use]
    pub fn new(title: impl Into<String>, results: Vec<CaseResult>) -> Self {
        Self {
            title: title.into(),
            timestamp: rldebug_core::structured_log::now_utc(),
            summary: CampaignSummary::from_results(results),
        }
    }

    /// Render the report as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n\n", self.title));
        out.push_str(&format!("- Timestamp: {}\n", self.timestamp));
        out.push_str(&format!("- Total: {}\n", self.summary.total));
        out.push_str(&format!("- Passed: {}\n", self.summary.passed));
        out.push_str(&format!("- Failed: {}\n", self.summary.failed));
        out.push_str(&format!(
            "- Leaked bytes: {}\n\n",
            self.summary.leaked_bytes
        ));

        out.push_str("| Case | Exit | Leaks | Fault | Status |\n");
        out.push_str("|------|------|-------|-------|--------|\n");
        for r in &self.summary.results {
            let status = if r.passed { "PASS" } else { "FAIL" };
            let exit = r
                .exit_code
                .map_or_else(|| "-".to_string(), |code| code.to_string());
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                r.case_name,
                exit,
                r.leaked_resources,
                r.fault.as_deref().unwrap_or("-"),
                status
            ));
        }

        let failures: Vec<&CaseResult> =
            self.summary.results.iter().filter(|r| !r.passed).collect();
        if !failures.is_empty() {
            out.push_str("\n## Failures\n");
            for r in failures {
                out.push_str(&format!("\n### {}\n\n", r.case_name));
                if let Some(diff) = &r.diff {
                    out.push_str("```\n");
                    out.push_str(diff);
                    out.push_str("\n```\n");
                }
            }
        }
        out
    }

    /// Render the report as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    /// Parse a report previously written with [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self, HarnessError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write `<stem>.md` and `<stem>.json` into `dir`.
    pub fn write_to(&self, dir: &Path, stem: &str) -> Result<(), HarnessError> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(format!("{stem}.md")), self.to_markdown())?;
        std::fs::write(dir.join(format!("{stem}.json")), self.to_json())?;
        Ok(())
    }
}
