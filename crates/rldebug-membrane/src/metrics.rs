//! Atomic counters for debugger observability.
//!
//! All counters use relaxed ordering; they are diagnostic only.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-context operation counters.
#[derive(Debug)]
pub struct DebuggerMetrics {
    /// Registry validation sweeps performed.
    pub validations: AtomicU64,
    /// Descriptors checked across all sweeps.
    pub descriptors_checked: AtomicU64,
    /// Successful acquisitions (blocks and streams).
    pub acquisitions: AtomicU64,
    /// Successful releases (blocks and streams).
    pub releases: AtomicU64,
    /// Successful in-place resizes.
    pub resizes: AtomicU64,
    /// Calls refused softly (limits, platform exhaustion, open failures).
    pub soft_failures: AtomicU64,
    /// Warnings raised.
    pub warnings: AtomicU64,
    /// Fatal faults raised.
    pub fatal_faults: AtomicU64,
}

impl DebuggerMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            validations: AtomicU64::new(0),
            descriptors_checked: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            resizes: AtomicU64::new(0),
            soft_failures: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            fatal_faults: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            validations: Self::get(&self.validations),
            descriptors_checked: Self::get(&self.descriptors_checked),
            acquisitions: Self::get(&self.acquisitions),
            releases: Self::get(&self.releases),
            resizes: Self::get(&self.resizes),
            soft_failures: Self::get(&self.soft_failures),
            warnings: Self::get(&self.warnings),
            fatal_faults: Self::get(&self.fatal_faults),
        }
    }
}

impl Default for DebuggerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub validations: u64,
    pub descriptors_checked: u64,
    pub acquisitions: u64,
    pub releases: u64,
    pub resizes: u64,
    pub soft_failures: u64,
    pub warnings: u64,
    pub fatal_faults: u64,
}

impl MetricsSnapshot {
    /// Acquisitions not yet matched by a release.
    #[must_use]
    pub const fn outstanding(&self) -> u64 {
        self.acquisitions.saturating_sub(self.releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_start_at_zero() {
        let m = DebuggerMetrics::new();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increment_and_snapshot() {
        let m = DebuggerMetrics::new();
        DebuggerMetrics::inc(&m.acquisitions);
        DebuggerMetrics::inc(&m.acquisitions);
        DebuggerMetrics::inc(&m.releases);
        DebuggerMetrics::add(&m.descriptors_checked, 5);
        let snap = m.snapshot();
        assert_eq!(snap.acquisitions, 2);
        assert_eq!(snap.releases, 1);
        assert_eq!(snap.descriptors_checked, 5);
        assert_eq!(snap.outstanding(), 1);
    }
}
