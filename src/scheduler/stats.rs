// src/scheduler/stats.rs
//! Flush outcome types and running counters.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Result of one scheduler tick, keyed by `{sensor}:{metric}`.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Rows written, with the persisted value.
    pub flushed: HashMap<String, f64>,
    /// Registered and active, but nothing cached.
    pub empty: Vec<String>,
    /// Per-sensor failures. Not retried until the next tick.
    pub failed: HashMap<String, String>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Counters shared between the scheduler and the HTTP stats endpoint.
#[derive(Debug, Default)]
pub struct FlushStats {
    ticks: AtomicU64,
    rows_flushed: AtomicU64,
    failures: AtomicU64,
    last_tick_ms: AtomicI64,
}

/// Point-in-time copy of [`FlushStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlushStatsSnapshot {
    pub ticks: u64,
    pub rows_flushed: u64,
    pub failures: u64,
    /// Unix millis of the last completed tick, 0 if none yet.
    pub last_tick_ms: i64,
}

impl FlushStats {
    pub fn record(&self, report: &FlushReport, finished_ms: i64) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.rows_flushed
            .fetch_add(report.flushed.len() as u64, Ordering::Relaxed);
        self.failures
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
        self.last_tick_ms.store(finished_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FlushStatsSnapshot {
        FlushStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            rows_flushed: self.rows_flushed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_tick_ms: self.last_tick_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_accumulate_across_ticks() {
        let stats = FlushStats::default();
        let mut report = FlushReport::default();
        report.flushed.insert("S1:temperature".into(), 20.0);
        report.failed.insert("S2:temperature".into(), "down".into());
        stats.record(&report, 1_000);
        stats.record(&FlushReport::default(), 2_000);

        assert_eq!(
            stats.snapshot(),
            FlushStatsSnapshot {
                ticks: 2,
                rows_flushed: 1,
                failures: 1,
                last_tick_ms: 2_000,
            }
        );
    }

    #[test]
    fn report_clean_when_nothing_failed() {
        let mut report = FlushReport::default();
        report.empty.push("S1:humidity".into());
        assert!(report.is_clean());
        report.failed.insert("S1:humidity".into(), "x".into());
        assert!(!report.is_clean());
    }
}
