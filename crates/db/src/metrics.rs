//! Counters for the reordering engine.
//!
//! All metrics are atomic, so a `ReorderMetrics` can be cloned into every request
//! handler without locking.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::reorder::ReorderError;

#[derive(Clone, Default)]
pub struct ReorderMetrics {
    inner: Arc<ReorderMetricsInner>,
}

#[derive(Default)]
struct ReorderMetricsInner {
    operations_total: AtomicU64,
    operations_failed: AtomicU64,
    conflicts: AtomicU64,
    retries: AtomicU64,
    rejected: AtomicU64,
    duration_sum_us: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReorderMetricsSnapshot {
    pub operations_total: u64,
    pub operations_failed: u64,
    /// Attempts that hit a concurrent writer, retried or not
    pub conflicts: u64,
    pub retries: u64,
    /// NotFound and InvalidMove outcomes
    pub rejected: u64,
    pub avg_duration_us: u64,
}

impl ReorderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished operation (after any retries).
    pub fn record_operation(&self, duration: Duration, outcome: Result<(), &ReorderError>) {
        let inner = &self.inner;
        inner.operations_total.fetch_add(1, Ordering::Relaxed);
        inner
            .duration_sum_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        match outcome {
            Ok(()) => {}
            Err(ReorderError::NotFound { .. } | ReorderError::InvalidMove(_)) => {
                inner.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                inner.operations_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record one attempt that failed with a conflict.
    pub fn record_conflict(&self, will_retry: bool) {
        self.inner.conflicts.fetch_add(1, Ordering::Relaxed);
        if will_retry {
            self.inner.retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ReorderMetricsSnapshot {
        let inner = &self.inner;
        let total = inner.operations_total.load(Ordering::Relaxed);
        let sum = inner.duration_sum_us.load(Ordering::Relaxed);
        ReorderMetricsSnapshot {
            operations_total: total,
            operations_failed: inner.operations_failed.load(Ordering::Relaxed),
            conflicts: inner.conflicts.load(Ordering::Relaxed),
            retries: inner.retries.load(Ordering::Relaxed),
            rejected: inner.rejected.load(Ordering::Relaxed),
            avg_duration_us: if total > 0 { sum / total } else { 0 },
        }
    }
}
