use std::sync::atomic::{AtomicU64, Ordering};

// Global counters (low overhead). These are coarse-grained and process-wide,
// summed over every worker; per-worker numbers live in `core::stats`.
static ENQUEUED: AtomicU64 = AtomicU64::new(0);
static PROCESSED: AtomicU64 = AtomicU64::new(0);
static DROPPED_OVERFLOW: AtomicU64 = AtomicU64::new(0);
static HANDLER_FAILURES: AtomicU64 = AtomicU64::new(0);
static LOOP_FAULTS: AtomicU64 = AtomicU64::new(0);
static FLUSH_BATCHES: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn inc_enqueued(n: u64) {
    ENQUEUED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_processed(n: u64) {
    PROCESSED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_dropped_overflow(n: u64) {
    DROPPED_OVERFLOW.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_handler_failures(n: u64) {
    HANDLER_FAILURES.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_loop_faults(n: u64) {
    LOOP_FAULTS.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_flush_batches(n: u64) {
    FLUSH_BATCHES.fetch_add(n, Ordering::Relaxed);
}

pub fn snapshot() -> String {
    // Simple text format (Prometheus-style without HELP/TYPE lines for brevity)
    format!(
        "blipbatch_enqueued {}\nblipbatch_processed {}\nblipbatch_dropped_overflow {}\nblipbatch_handler_failures {}\nblipbatch_loop_faults {}\nblipbatch_flush_batches {}\n",
        ENQUEUED.load(Ordering::Relaxed),
        PROCESSED.load(Ordering::Relaxed),
        DROPPED_OVERFLOW.load(Ordering::Relaxed),
        HANDLER_FAILURES.load(Ordering::Relaxed),
        LOOP_FAULTS.load(Ordering::Relaxed),
        FLUSH_BATCHES.load(Ordering::Relaxed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_lists_every_counter() {
        inc_flush_batches(1);
        let text = snapshot();
        for name in [
            "blipbatch_enqueued",
            "blipbatch_processed",
            "blipbatch_dropped_overflow",
            "blipbatch_handler_failures",
            "blipbatch_loop_faults",
            "blipbatch_flush_batches",
        ] {
            assert!(text.contains(name), "missing {name}");
        }
    }
}
