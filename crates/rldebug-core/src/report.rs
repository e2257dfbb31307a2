//! Leak reporting.
//!
//! [`Debugger::summarize`] lists every resource still registered, checks the
//! listed byte total against the heap counter and returns the number of
//! leaked resources (0 means clean).

use std::fmt::Write as _;

use rldebug_membrane::{BlockHandle, Resource, SourceLocation};
use serde::Serialize;

use crate::debugger::Debugger;
use crate::fault::{Event, FatalFault};
use crate::structured_log::{LogEntry, LogFormat, LogLevel};

/// Stream names longer than this are shortened in the listing.
const STREAM_NAME_WIDTH: usize = 25;
const STREAM_NAME_KEEP: usize = STREAM_NAME_WIDTH - 5;
const RULE: &str = "--------------------------------------------\n";

/// One unreleased memory block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakedBlock {
    /// Position in the registry, from 1.
    pub index: usize,
    pub address: String,
    pub size: usize,
    pub produced_by: &'static str,
    pub file: String,
    pub line: u32,
}

/// One unclosed stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakedStream {
    /// Position in the registry, from 1.
    pub index: usize,
    pub name: String,
    pub mode: String,
    pub file: String,
    pub line: u32,
}

/// Snapshot of everything still registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    pub blocks: Vec<LeakedBlock>,
    pub streams: Vec<LeakedStream>,
    pub leaked_bytes: usize,
    pub peak_heap_size: usize,
}

impl LeakReport {
    /// Leaked blocks plus unclosed streams.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.blocks.len() + self.streams.len()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.resource_count() == 0
    }

    /// Render the leak tables. With `force`, the all-clear lines are printed too.
    #[must_use]
    pub fn render_text(&self, force: bool) -> String {
        let mut out = String::new();

        if !self.blocks.is_empty() {
            out.push_str("\nMemory leaks:\n");
            out.push_str(RULE);
            out.push_str(" ID                Address       Source file\n");
            out.push_str("             Size (bytes)       Line\n");
            out.push_str(RULE);
            for block in &self.blocks {
                let _ = writeln!(out, " {:<3}  {:>18}       {}", block.index, block.address, block.file);
                let _ = writeln!(out, "      {:>18}       {}", block.size, block.line);
            }
            out.push_str(RULE);
        }
        if !self.blocks.is_empty() {
            let _ = writeln!(out, "Unreleased memory blocks: {}", self.blocks.len());
            let _ = writeln!(out, "Total leaked memory: {} byte(s)", self.leaked_bytes);
        } else if force {
            out.push_str("All memory blocks were released - no leaks.\n");
        }

        if !self.streams.is_empty() {
            out.push_str("\nUnclosed files:\n");
            out.push_str(RULE);
            out.push_str(" ID  Name                      Source file\n");
            out.push_str("     Mode                      Line\n");
            out.push_str(RULE);
            for stream in &self.streams {
                let _ = writeln!(out, " {:<3} {:<25} {}", stream.index, stream.name, stream.file);
                let _ = writeln!(out, "     {:<25} {}", stream.mode, stream.line);
            }
            out.push_str(RULE);
        }
        if !self.streams.is_empty() {
            let _ = writeln!(out, "Unclosed files: {}", self.streams.len());
        } else if force {
            out.push_str("All files were closed.\n");
        }

        if force {
            out.push_str("No heap corruption detected.\n\n");
        }
        out
    }
}

/// Shorten a stream name for the listing: over 25 characters keeps the first 20 plus `(...)`.
#[must_use]
pub fn display_stream_name(name: &str) -> String {
    if name.chars().count() > STREAM_NAME_WIDTH {
        let mut short: String = name.chars().take(STREAM_NAME_KEEP).collect();
        short.push_str("(...)");
        short
    } else {
        name.to_string()
    }
}

impl Debugger {
    /// Collect the current leak listing without printing anything.
    #[must_use]
    pub fn leak_report(&self) -> LeakReport {
        let mut report = LeakReport {
            peak_heap_size: self.registry.peak_heap_size(),
            ..LeakReport::default()
        };
        for (position, (_, desc)) in self.registry.iter().enumerate() {
            let index = position + 1;
            let file = desc.location.file_name().to_string();
            let line = desc.location.line;
            match &desc.resource {
                Resource::Memory(block) => {
                    report.leaked_bytes += block.size();
                    report.blocks.push(LeakedBlock {
                        index,
                        address: format!("{:#x}", block.handle().addr()),
                        size: block.size(),
                        produced_by: block.produced_by.symbol(),
                        file,
                        line,
                    });
                }
                Resource::Stream(record) => report.streams.push(LeakedStream {
                    index,
                    name: display_stream_name(&record.name),
                    mode: record.mode.clone(),
                    file,
                    line,
                }),
            }
        }
        report
    }

    /// Print the leak listing and return the number of leaked resources.
    ///
    /// Nothing is printed for a clean run unless `force` is set. A listed
    /// byte total that disagrees with the heap counter is a fatal fault.
    pub fn summarize(&mut self, force: bool) -> usize {
        self.sweep(SourceLocation::unknown());
        let report = self.leak_report();
        let current = self.registry.current_heap_size();
        if report.leaked_bytes != current {
            self.fatal(
                FatalFault::new(Event::LeakTotalMismatch, SourceLocation::unknown()).with_detail(
                    format!("listed {} bytes, counter holds {current}", report.leaked_bytes),
                ),
            );
        }

        if !report.is_clean() || force {
            // Summaries are printed whatever the threshold.
            let _ = match self.log.format() {
                LogFormat::Text => self.log.write_block(&report.render_text(force)),
                LogFormat::Jsonl => {
                    let entry = LogEntry::new(
                        "",
                        if report.is_clean() {
                            LogLevel::Info
                        } else {
                            LogLevel::Warning
                        },
                        "leak_summary",
                        format!("{} leaked resource(s)", report.resource_count()),
                    )
                    .with_size(report.leaked_bytes)
                    .with_details(serde_json::to_value(&report).unwrap_or_default());
                    self.log.emit_entry(entry, true)
                }
            };
        }
        report.resource_count()
    }

    /// Total bytes of live memory blocks.
    #[must_use]
    pub fn leak_size(&self) -> usize {
        self.registry
            .iter()
            .filter_map(|(_, d)| d.as_memory())
            .map(|b| b.size())
            .sum()
    }

    /// Registered size of a live block, `None` for an unknown handle.
    #[must_use]
    pub fn block_size(&self, handle: BlockHandle) -> Option<usize> {
        let slot = self.registry.find_block(handle)?;
        self.registry.get(slot)?.as_memory().map(|b| b.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_stream_names_are_shortened() {
        assert_eq!(display_stream_name("short.txt"), "short.txt");
        let exactly = "a".repeat(25);
        assert_eq!(display_stream_name(&exactly), exactly);
        let long = "abcdefghijklmnopqrstuvwxyz.txt";
        assert_eq!(display_stream_name(long), "abcdefghijklmnopqrst(...)");
    }

    #[test]
    fn clean_report_prints_only_when_forced() {
        let report = LeakReport::default();
        assert!(report.render_text(false).is_empty());
        let forced = report.render_text(true);
        assert!(forced.contains("no leaks"));
        assert!(forced.contains("All files were closed."));
        assert!(forced.contains("No heap corruption detected."));
    }

    #[test]
    fn block_table_lists_size_and_site() {
        let report = LeakReport {
            blocks: vec![LeakedBlock {
                index: 2,
                address: "0x10".to_string(),
                size: 48,
                produced_by: "malloc",
                file: "main.c".to_string(),
                line: 12,
            }],
            leaked_bytes: 48,
            ..LeakReport::default()
        };
        let text = report.render_text(false);
        assert!(text.contains("Memory leaks:"));
        assert!(text.contains("main.c"));
        assert!(text.contains("Total leaked memory: 48 byte(s)"));
        assert!(!text.contains("Unclosed files"));
    }
}
