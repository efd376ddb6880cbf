//! Per-channel counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one ingest channel
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    rows_inserted: AtomicU64,
    rows_appended: AtomicU64,
    batches_appended: AtomicU64,
    flush_errors: AtomicU64,
    reopens: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rows_inserted: u64,
    pub rows_appended: u64,
    pub batches_appended: u64,
    pub flush_errors: u64,
    pub reopens: u64,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rows_inserted(&self, count: u64) {
        self.rows_inserted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_append(&self, rows: u64) {
        self.rows_appended.fetch_add(rows, Ordering::Relaxed);
        self.batches_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_error(&self) {
        self.flush_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reopen(&self) {
        self.reopens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_inserted: self.rows_inserted.load(Ordering::Relaxed),
            rows_appended: self.rows_appended.load(Ordering::Relaxed),
            batches_appended: self.batches_appended.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
            reopens: self.reopens.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = ChannelMetrics::new();
        metrics.record_rows_inserted(10);
        metrics.record_append(10);
        metrics.record_append(5);
        metrics.record_flush_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rows_inserted, 10);
        assert_eq!(snapshot.rows_appended, 15);
        assert_eq!(snapshot.batches_appended, 2);
        assert_eq!(snapshot.flush_errors, 1);
        assert_eq!(snapshot.reopens, 0);
    }
}
