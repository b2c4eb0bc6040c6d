//! Activity counters for monitoring ring throughput.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters updated on the hot path with relaxed atomics.
///
/// Producer and consumer each touch only their own counters, so the cost is
/// one uncontended fetch-add per commit/dequeue.
#[derive(Debug, Default)]
pub struct Metrics {
    bytes_committed: AtomicU64,
    bytes_dequeued: AtomicU64,
    commits: AtomicU64,
    dequeues: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_committed(&self, bytes: u64) {
        self.bytes_committed.fetch_add(bytes, Ordering::Relaxed);
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_dequeued(&self, bytes: u64) {
        self.bytes_dequeued.fetch_add(bytes, Ordering::Relaxed);
        self.dequeues.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time copy of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_committed: self.bytes_committed.load(Ordering::Relaxed),
            bytes_dequeued: self.bytes_dequeued.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            dequeues: self.dequeues.load(Ordering::Relaxed),
        }
    }
}

/// Counter values captured by [`Metrics::snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total bytes published by the producer.
    pub bytes_committed: u64,
    /// Total bytes released by the consumer.
    pub bytes_dequeued: u64,
    /// Number of commit operations.
    pub commits: u64,
    /// Number of dequeue operations.
    pub dequeues: u64,
}

impl MetricsSnapshot {
    /// Bytes sitting in the ring at snapshot time (committed, not yet
    /// dequeued).
    pub fn backlog(&self) -> u64 {
        self.bytes_committed.saturating_sub(self.bytes_dequeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.add_committed(100);
        metrics.add_committed(50);
        metrics.add_dequeued(120);

        let snap = metrics.snapshot();
        assert_eq!(snap.bytes_committed, 150);
        assert_eq!(snap.bytes_dequeued, 120);
        assert_eq!(snap.commits, 2);
        assert_eq!(snap.dequeues, 1);
        assert_eq!(snap.backlog(), 30);
    }

    #[test]
    fn test_backlog_never_underflows() {
        let snap = MetricsSnapshot {
            bytes_committed: 10,
            bytes_dequeued: 20,
            ..MetricsSnapshot::default()
        };
        assert_eq!(snap.backlog(), 0);
    }
}
