//! Per-worker counters.
//!
//! Counters are bumped from the producer, drain and age-monitor threads
//! concurrently, so they are plain relaxed atomics. `snapshot()` gives a
//! point-in-time copy; individual fields may be a few updates apart.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::core::batch::FlushTrigger;
use crate::metrics;

#[derive(Debug, Default)]
pub struct ItemStats {
    enqueued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    iterations: AtomicU64,
}

/// Copy of [`ItemStats`] at one instant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ItemStatsSnapshot {
    pub enqueued: u64,
    /// Items handed to the handler, whether it succeeded or not.
    pub processed: u64,
    pub failed: u64,
    /// Items discarded by a bounded queue's overflow policy.
    pub dropped: u64,
    /// Drain iterations that found work.
    pub iterations: u64,
}

impl ItemStats {
    #[inline]
    pub(crate) fn on_enqueue(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::inc_enqueued(1);
    }

    #[inline]
    pub(crate) fn on_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::inc_dropped_overflow(1);
    }

    #[inline]
    pub(crate) fn on_iteration(&self, items: usize) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(items as u64, Ordering::Relaxed);
        metrics::inc_processed(items as u64);
    }

    #[inline]
    pub(crate) fn on_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::inc_handler_failures(1);
    }

    pub fn snapshot(&self) -> ItemStatsSnapshot {
        ItemStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchStats {
    batches: AtomicU64,
    items: AtomicU64,
    flush_by_size: AtomicU64,
    flush_by_age: AtomicU64,
    failed: AtomicU64,
    max_batch_len: AtomicUsize,
}

/// Copy of [`BatchStats`] at one instant.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct BatchStatsSnapshot {
    /// Batches delivered to the handler (including failed ones).
    pub batches: u64,
    pub items: u64,
    pub flush_by_size: u64,
    pub flush_by_age: u64,
    pub failed: u64,
    pub max_batch_len: usize,
}

impl BatchStatsSnapshot {
    pub fn avg_batch_len(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.items as f64 / self.batches as f64
        }
    }
}

impl BatchStats {
    pub(crate) fn on_flush(&self, len: usize, trigger: FlushTrigger) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.items.fetch_add(len as u64, Ordering::Relaxed);
        self.max_batch_len.fetch_max(len, Ordering::Relaxed);
        match trigger {
            FlushTrigger::Size => self.flush_by_size.fetch_add(1, Ordering::Relaxed),
            FlushTrigger::Age => self.flush_by_age.fetch_add(1, Ordering::Relaxed),
        };
        metrics::inc_flush_batches(1);
    }

    pub(crate) fn on_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::inc_handler_failures(1);
    }

    pub fn snapshot(&self) -> BatchStatsSnapshot {
        BatchStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            items: self.items.load(Ordering::Relaxed),
            flush_by_size: self.flush_by_size.load(Ordering::Relaxed),
            flush_by_age: self.flush_by_age.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            max_batch_len: self.max_batch_len.load(Ordering::Relaxed),
        }
    }
}
