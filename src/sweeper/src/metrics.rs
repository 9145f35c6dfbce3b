//! Sweep metrics tracking
//!
//! Process-local counters shared by the sweepers and the batch executor.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Thread-safe counters for one or more sweep runs
#[derive(Debug, Clone, Default)]
pub struct SweepMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    entries_processed: AtomicUsize,
    documents_scanned: AtomicUsize,
    documents_matched: AtomicUsize,
    operations_applied: AtomicUsize,
    operations_failed: AtomicUsize,
    chunks_committed: AtomicUsize,
    retries_attempted: AtomicUsize,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished catalog entry
    pub fn record_entry(&self) {
        self.inner.entries_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scanned(&self, documents: usize) {
        self.inner
            .documents_scanned
            .fetch_add(documents, Ordering::Relaxed);
    }

    pub fn record_matched(&self, documents: usize) {
        self.inner
            .documents_matched
            .fetch_add(documents, Ordering::Relaxed);
    }

    /// Record one commit call that reached the store
    pub fn record_chunk(&self, applied: usize, failed: usize) {
        self.inner.chunks_committed.fetch_add(1, Ordering::Relaxed);
        self.record_applied(applied);
        self.record_failed(failed);
    }

    pub fn record_applied(&self, operations: usize) {
        self.inner
            .operations_applied
            .fetch_add(operations, Ordering::Relaxed);
    }

    pub fn record_failed(&self, operations: usize) {
        self.inner
            .operations_failed
            .fetch_add(operations, Ordering::Relaxed);
    }

    /// Record a retry attempt, for reads and writes alike
    pub fn record_retry(&self) {
        self.inner.retries_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entries_processed(&self) -> usize {
        self.inner.entries_processed.load(Ordering::Relaxed)
    }

    pub fn documents_scanned(&self) -> usize {
        self.inner.documents_scanned.load(Ordering::Relaxed)
    }

    pub fn documents_matched(&self) -> usize {
        self.inner.documents_matched.load(Ordering::Relaxed)
    }

    pub fn operations_applied(&self) -> usize {
        self.inner.operations_applied.load(Ordering::Relaxed)
    }

    pub fn operations_failed(&self) -> usize {
        self.inner.operations_failed.load(Ordering::Relaxed)
    }

    pub fn chunks_committed(&self) -> usize {
        self.inner.chunks_committed.load(Ordering::Relaxed)
    }

    pub fn retries_attempted(&self) -> usize {
        self.inner.retries_attempted.load(Ordering::Relaxed)
    }

    /// Get a summary of all metrics
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            entries_processed: self.entries_processed(),
            documents_scanned: self.documents_scanned(),
            documents_matched: self.documents_matched(),
            operations_applied: self.operations_applied(),
            operations_failed: self.operations_failed(),
            chunks_committed: self.chunks_committed(),
            retries_attempted: self.retries_attempted(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSummary {
    pub entries_processed: usize,
    pub documents_scanned: usize,
    pub documents_matched: usize,
    pub operations_applied: usize,
    pub operations_failed: usize,
    pub chunks_committed: usize,
    pub retries_attempted: usize,
}

impl MetricsSummary {
    /// Share of matched documents that were applied
    pub fn success_rate(&self) -> f64 {
        let attempted = self.operations_applied + self.operations_failed;
        if attempted > 0 {
            self.operations_applied as f64 / attempted as f64
        } else {
            1.0
        }
    }

    /// Log the metrics summary
    pub fn log(&self) {
        log::info!("=== Sweep Metrics Summary ===");
        log::info!(
            "Entries: {} processed, {} documents scanned, {} matched",
            self.entries_processed,
            self.documents_scanned,
            self.documents_matched
        );
        log::info!(
            "Operations: {} applied, {} failed ({:.1}% success)",
            self.operations_applied,
            self.operations_failed,
            self.success_rate() * 100.0
        );
        log::info!(
            "Commits: {} chunks, {} retries attempted",
            self.chunks_committed,
            self.retries_attempted
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let summary = SweepMetrics::new().summary();

        assert_eq!(summary.entries_processed, 0);
        assert_eq!(summary.chunks_committed, 0);
        assert_eq!(summary.retries_attempted, 0);
        assert_eq!(summary.success_rate(), 1.0);
    }

    #[test]
    fn test_chunk_recording() {
        let metrics = SweepMetrics::new();
        metrics.record_chunk(500, 0);
        metrics.record_chunk(0, 500);
        metrics.record_chunk(200, 0);

        assert_eq!(metrics.chunks_committed(), 3);
        assert_eq!(metrics.operations_applied(), 700);
        assert_eq!(metrics.operations_failed(), 500);
        assert!((metrics.summary().success_rate() - 700.0 / 1200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = SweepMetrics::new();
        let clone = metrics.clone();

        clone.record_retry();
        clone.record_scanned(2);
        clone.record_matched(1);
        clone.record_entry();

        assert_eq!(metrics.retries_attempted(), 1);
        assert_eq!(metrics.documents_scanned(), 2);
        assert_eq!(metrics.documents_matched(), 1);
        assert_eq!(metrics.entries_processed(), 1);
    }
}
