//! Purge run metrics
//!
//! Thread-safe counters shared by every task of a purge run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Thread-safe metrics for tracking purge runs
#[derive(Debug, Clone)]
pub struct PurgeMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    subjects_started: AtomicUsize,
    subjects_fully_purged: AtomicUsize,
    subjects_with_failures: AtomicUsize,
    objects_deleted: AtomicUsize,
    objects_redacted: AtomicUsize,
    lines_redacted: AtomicU64,
    location_failures: AtomicUsize,
    retries_attempted: AtomicUsize,
}

impl Default for PurgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PurgeMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub fn record_subject_start(&self) {
        self.inner.subjects_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the terminal state of a subject
    pub fn record_subject_finished(&self, fully_purged: bool) {
        if fully_purged {
            self.inner
                .subjects_fully_purged
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner
                .subjects_with_failures
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_object_deleted(&self) {
        self.inner.objects_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_object_redacted(&self, lines: u64) {
        self.inner.objects_redacted.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lines_redacted
            .fetch_add(lines, Ordering::Relaxed);
    }

    pub fn record_location_failure(&self) {
        self.inner.location_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record retries beyond the first attempt
    pub fn record_retries(&self, attempts: u32) {
        let retries = attempts.saturating_sub(1) as usize;
        if retries > 0 {
            self.inner
                .retries_attempted
                .fetch_add(retries, Ordering::Relaxed);
        }
    }

    pub fn subjects_started(&self) -> usize {
        self.inner.subjects_started.load(Ordering::Relaxed)
    }

    pub fn subjects_fully_purged(&self) -> usize {
        self.inner.subjects_fully_purged.load(Ordering::Relaxed)
    }

    pub fn subjects_with_failures(&self) -> usize {
        self.inner.subjects_with_failures.load(Ordering::Relaxed)
    }

    pub fn objects_deleted(&self) -> usize {
        self.inner.objects_deleted.load(Ordering::Relaxed)
    }

    pub fn objects_redacted(&self) -> usize {
        self.inner.objects_redacted.load(Ordering::Relaxed)
    }

    pub fn lines_redacted(&self) -> u64 {
        self.inner.lines_redacted.load(Ordering::Relaxed)
    }

    pub fn location_failures(&self) -> usize {
        self.inner.location_failures.load(Ordering::Relaxed)
    }

    pub fn retries_attempted(&self) -> usize {
        self.inner.retries_attempted.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            subjects_started: self.subjects_started(),
            subjects_fully_purged: self.subjects_fully_purged(),
            subjects_with_failures: self.subjects_with_failures(),
            objects_deleted: self.objects_deleted(),
            objects_redacted: self.objects_redacted(),
            lines_redacted: self.lines_redacted(),
            location_failures: self.location_failures(),
            retries_attempted: self.retries_attempted(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub subjects_started: usize,
    pub subjects_fully_purged: usize,
    pub subjects_with_failures: usize,
    pub objects_deleted: usize,
    pub objects_redacted: usize,
    pub lines_redacted: u64,
    pub location_failures: usize,
    pub retries_attempted: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        tracing::info!(
            subjects = self.subjects_started,
            fully_purged = self.subjects_fully_purged,
            with_failures = self.subjects_with_failures,
            "Purge subjects summary"
        );
        tracing::info!(
            objects_deleted = self.objects_deleted,
            objects_redacted = self.objects_redacted,
            lines_redacted = self.lines_redacted,
            location_failures = self.location_failures,
            retries = self.retries_attempted,
            "Purge locations summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_start_at_zero() {
        let summary = PurgeMetrics::new().summary();
        assert_eq!(summary.subjects_started, 0);
        assert_eq!(summary.lines_redacted, 0);
        assert_eq!(summary.retries_attempted, 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = PurgeMetrics::new();
        let handle = metrics.clone();

        handle.record_subject_start();
        handle.record_object_deleted();
        handle.record_object_redacted(3);
        handle.record_object_redacted(2);
        handle.record_subject_finished(true);

        assert_eq!(metrics.subjects_started(), 1);
        assert_eq!(metrics.objects_deleted(), 1);
        assert_eq!(metrics.objects_redacted(), 2);
        assert_eq!(metrics.lines_redacted(), 5);
        assert_eq!(metrics.subjects_fully_purged(), 1);
    }

    #[test]
    fn test_first_attempt_is_not_a_retry() {
        let metrics = PurgeMetrics::new();
        metrics.record_retries(1);
        assert_eq!(metrics.retries_attempted(), 0);
        metrics.record_retries(3);
        assert_eq!(metrics.retries_attempted(), 2);
    }

    #[test]
    fn test_failure_counters() {
        let metrics = PurgeMetrics::new();
        metrics.record_location_failure();
        metrics.record_subject_finished(false);
        let summary = metrics.summary();
        assert_eq!(summary.location_failures, 1);
        assert_eq!(summary.subjects_with_failures, 1);
        assert_eq!(summary.subjects_fully_purged, 0);
    }
}
