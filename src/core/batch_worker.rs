//! Size/age-bounded batching on top of [`ItemWorker`].
//!
//! The inner item worker's handler appends each item to the current batch
//! and flushes it once it holds `max_batch_size` items. An age monitor on a
//! second thread flushes the current batch once its deadline has passed.
//!
//! Both triggers go through [`Shared::try_flush`]: an optimistic check
//! against atomics mirroring the current batch, then a re-check under the
//! batch-switch lock. Only the caller whose re-check still holds swaps in a
//! fresh batch, so a batch is flushed exactly once even when both triggers
//! fire together. The detached batch is queued on an outbox while the
//! batch-switch lock is still held, so outbox order is flush order. Delivery
//! happens after that lock is released: whichever thread wins the delivery
//! lock with `try_lock` drains the outbox, so handlers run one at a time and
//! no thread ever waits for a handler while holding the batch-switch lock.

use std::collections::VecDeque;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::core::batch::{Batch, FlushTrigger};
use crate::core::error::{panic_message, HandlerResult, WorkerError};
use crate::core::item_worker::{ItemWorker, ItemWorkerConfig};
use crate::core::lifecycle::{spawn_loop, StopSignal, WorkerState};
use crate::core::report::{notify, ErrorLog};
use crate::core::stats::{BatchStats, BatchStatsSnapshot, ItemStatsSnapshot};

/// Per-batch callback.
pub type BatchHandler<T> = Arc<dyn Fn(Batch<T>) -> HandlerResult + Send + Sync>;

// Ten years; keeps `Instant + max_batch_age` from overflowing.
const MAX_BATCH_AGE_CEILING: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct BatchWorkerConfig {
    /// Settings of the inner item worker.
    pub items: ItemWorkerConfig,
    pub max_batch_size: usize,
    pub max_batch_age: Duration,
    /// Pause between age-monitor checks.
    pub age_check_interval: Duration,
}

impl Default for BatchWorkerConfig {
    fn default() -> Self {
        Self {
            items: ItemWorkerConfig::default(),
            max_batch_size: 100,
            max_batch_age: Duration::from_secs(5),
            age_check_interval: Duration::from_millis(10),
        }
    }
}

impl BatchWorkerConfig {
    pub(crate) fn normalized(self) -> Self {
        Self {
            items: self.items.normalized(),
            max_batch_size: self.max_batch_size.max(1),
            max_batch_age: self.max_batch_age.min(MAX_BATCH_AGE_CEILING),
            age_check_interval: self.age_check_interval.max(Duration::from_millis(1)),
        }
    }
}

/// The batch new items are appended to.
struct OpenBatch<T> {
    items: Vec<T>,
    created_at: Instant,
    deadline: Instant,
}

struct Shared<T> {
    name: String,
    max_batch_size: usize,
    max_batch_age: Duration,
    origin: Instant,
    // Batch-switch lock.
    current: Mutex<OpenBatch<T>>,
    // Mirrors of `current`, written only under the batch-switch lock.
    current_len: AtomicUsize,
    deadline_nanos: AtomicU64,
    // Flushed batches awaiting delivery, in sequence order.
    outbox: Mutex<VecDeque<Batch<T>>>,
    delivery: Mutex<()>,
    next_sequence: AtomicU64,
    handler: RwLock<Option<BatchHandler<T>>>,
    log: Arc<dyn ErrorLog>,
    stats: BatchStats,
}

impl<T> Shared<T> {
    fn new(name: String, log: Arc<dyn ErrorLog>, config: &BatchWorkerConfig) -> Self {
        let origin = Instant::now();
        let shared = Self {
            name,
            max_batch_size: config.max_batch_size,
            max_batch_age: config.max_batch_age,
            origin,
            current: Mutex::new(OpenBatch {
                items: Vec::new(),
                created_at: origin,
                deadline: origin + config.max_batch_age,
            }),
            current_len: AtomicUsize::new(0),
            deadline_nanos: AtomicU64::new(0),
            outbox: Mutex::new(VecDeque::new()),
            delivery: Mutex::new(()),
            next_sequence: AtomicU64::new(0),
            handler: RwLock::new(None),
            log,
            stats: BatchStats::default(),
        };
        shared.deadline_nanos.store(
            shared.nanos_since_origin(origin + config.max_batch_age),
            Ordering::Release,
        );
        shared
    }

    fn nanos_since_origin(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_nanos() as u64
    }

    /// Restarts the current batch's clock, keeping any items it holds.
    fn restart_clock(&self) {
        let now = Instant::now();
        let mut current = self.current.lock();
        current.created_at = now;
        current.deadline = now + self.max_batch_age;
        self.deadline_nanos
            .store(self.nanos_since_origin(current.deadline), Ordering::Release);
    }

    /// Accumulator: runs on the inner item worker's drain thread only.
    fn accumulate(&self, item: T) -> HandlerResult {
        {
            let mut current = self.current.lock();
            current.items.push(item);
            self.current_len.store(current.items.len(), Ordering::Release);
        }
        self.try_flush(FlushTrigger::Size);
        Ok(())
    }

    fn due_hint(&self, trigger: FlushTrigger) -> bool {
        match trigger {
            FlushTrigger::Size => self.current_len.load(Ordering::Acquire) >= self.max_batch_size,
            FlushTrigger::Age => {
                let deadline = self.deadline_nanos.load(Ordering::Acquire);
                self.nanos_since_origin(Instant::now()) >= deadline
            }
        }
    }

    fn is_due(&self, current: &OpenBatch<T>, trigger: FlushTrigger) -> bool {
        match trigger {
            FlushTrigger::Size => current.items.len() >= self.max_batch_size,
            FlushTrigger::Age => Instant::now() >= current.deadline,
        }
    }

    /// Flushes the current batch if `trigger` still holds under the
    /// batch-switch lock. Returns whether this call detached a batch.
    fn try_flush(&self, trigger: FlushTrigger) -> bool {
        if !self.due_hint(trigger) {
            return false;
        }

        {
            let mut current = self.current.lock();
            if !self.is_due(&current, trigger) {
                return false;
            }

            let now = Instant::now();
            let fresh = OpenBatch {
                items: Vec::with_capacity(self.max_batch_size.min(1024)),
                created_at: now,
                deadline: now + self.max_batch_age,
            };
            let detached = mem::replace(&mut *current, fresh);
            self.current_len.store(0, Ordering::Release);
            self.deadline_nanos
                .store(self.nanos_since_origin(current.deadline), Ordering::Release);

            // An expired empty batch only gets a new deadline.
            if detached.items.is_empty() {
                return false;
            }

            let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            self.outbox.lock().push_back(Batch::new(
                detached.items,
                detached.created_at,
                trigger,
                sequence,
            ));
        }

        self.deliver_pending();
        true
    }

    /// Drains the outbox unless another thread is already doing so.
    fn deliver_pending(&self) {
        loop {
            let Some(delivery) = self.delivery.try_lock() else {
                return;
            };
            loop {
                let next = self.outbox.lock().pop_front();
                match next {
                    Some(batch) => self.deliver(batch),
                    None => break,
                }
            }
            drop(delivery);

            // A batch queued after the last pop may have lost the try_lock race.
            if self.outbox.lock().is_empty() {
                return;
            }
        }
    }

    fn deliver(&self, batch: Batch<T>) {
        let len = batch.len();
        let trigger = batch.trigger();
        let sequence = batch.sequence();
        trace!(worker = %self.name, sequence, len, %trigger, "flushing batch");
        self.stats.on_flush(len, trigger);

        let handler = self.handler.read().clone();
        let fault = match handler {
            None => Some(WorkerError::MissingHandler),
            Some(handler) => match panic::catch_unwind(AssertUnwindSafe(|| handler(batch))) {
                Ok(Ok(())) => None,
                Ok(Err(source)) => Some(WorkerError::handler(source)),
                Err(payload) => Some(WorkerError::HandlerPanicked(panic_message(payload.as_ref()))),
            },
        };

        if let Some(fault) = fault {
            self.stats.on_failure();
            self.report(
                "flush_batch",
                &format!("batch {sequence} ({len} items, {trigger} trigger) dropped"),
                &fault,
            );
        }
    }

    fn report(&self, operation: &str, context: &str, err: &WorkerError) {
        notify(self.log.as_ref(), &self.name, operation, context, err);
    }
}

/// Background worker delivering items in batches bounded by size and age.
///
/// Items go in through [`BatchWorker::enqueue`] and come out as [`Batch`]es,
/// in enqueue order, through the handler installed with
/// [`BatchWorker::set_batch_handler`].
///
/// `stop()` neither drains the queue nor flushes the partial batch. Both are
/// kept; after the next `start()` the partial batch continues with a fresh
/// deadline.
pub struct BatchWorker<T> {
    items: ItemWorker<T>,
    shared: Arc<Shared<T>>,
    age_check_interval: Duration,
    monitor: Mutex<Option<StopSignal>>,
}

impl<T: Send + 'static> BatchWorker<T> {
    pub fn new(name: impl Into<String>, log: Arc<dyn ErrorLog>) -> Self {
        Self::with_config(name, log, BatchWorkerConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        log: Arc<dyn ErrorLog>,
        config: BatchWorkerConfig,
    ) -> Self {
        let config = config.normalized();
        let name = name.into();
        let shared = Arc::new(Shared::new(name.clone(), Arc::clone(&log), &config));

        let items = ItemWorker::with_config(name, log, config.items.clone());
        let accumulator = Arc::clone(&shared);
        items.set_handler(move |item| accumulator.accumulate(item));

        Self {
            items,
            shared,
            age_check_interval: config.age_check_interval,
            monitor: Mutex::new(None),
        }
    }

    /// Installs the per-batch callback. Set it before `start()`; batches
    /// flushed while no handler is installed are reported and dropped.
    pub fn set_batch_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Batch<T>) -> HandlerResult + Send + Sync + 'static,
    {
        *self.shared.handler.write() = Some(Arc::new(handler));
        self
    }

    pub fn enqueue(&self, item: T) {
        self.items.enqueue(item);
    }

    /// Gives the current batch a fresh deadline, then starts the drain loop
    /// and the age monitor. No-op while already running.
    pub fn start(&self) {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            return;
        }

        self.shared.restart_clock();

        let shared = Arc::clone(&self.shared);
        let fault_shared = Arc::clone(&self.shared);
        let spawned = spawn_loop(
            format!("{}-age", self.shared.name),
            self.age_check_interval,
            move || {
                shared.try_flush(FlushTrigger::Age);
            },
            move |err| fault_shared.report("age_monitor", "age check aborted", &err),
        );

        match spawned {
            Ok(signal) => {
                self.items.start();
                if !self.items.is_running() {
                    // The drain thread failed to spawn and was reported; the
                    // monitor exits once `signal` drops.
                    return;
                }
                *monitor = Some(signal);
                debug!(
                    worker = %self.shared.name,
                    max_batch_size = self.shared.max_batch_size,
                    max_batch_age_ms = self.shared.max_batch_age.as_millis() as u64,
                    "batch worker started"
                );
            }
            Err(e) => {
                self.shared
                    .report("start", "spawning age monitor thread", &WorkerError::Spawn(e));
            }
        }
    }

    /// Stops the drain loop and the age monitor at their next iteration
    /// boundary. Nothing is flushed. No-op while stopped.
    pub fn stop(&self) {
        let mut monitor = self.monitor.lock();
        if monitor.take().is_some() {
            self.items.stop();
            debug!(
                worker = %self.shared.name,
                queued = self.items.len(),
                partial = self.current_batch_len(),
                "batch worker stopped"
            );
        }
    }

    pub fn state(&self) -> WorkerState {
        if self.monitor.lock().is_some() {
            WorkerState::Running
        } else {
            WorkerState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Items enqueued but not yet appended to a batch.
    pub fn pending(&self) -> usize {
        self.items.len()
    }

    /// Items in the batch currently being filled.
    pub fn current_batch_len(&self) -> usize {
        self.shared.current_len.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn stats(&self) -> BatchStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn item_stats(&self) -> ItemStatsSnapshot {
        self.items.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::NullLog;
    use std::sync::Barrier;
    use std::thread;

    fn shared_with(max_batch_size: usize, max_batch_age: Duration) -> Arc<Shared<u32>> {
        let config = BatchWorkerConfig {
            max_batch_size,
            max_batch_age,
            ..Default::default()
        }
        .normalized();
        Arc::new(Shared::new("unit".into(), Arc::new(NullLog), &config))
    }

    fn record_batches(shared: &Shared<u32>) -> Arc<Mutex<Vec<(FlushTrigger, Vec<u32>)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        *shared.handler.write() = Some(Arc::new(move |batch: Batch<u32>| -> HandlerResult {
            sink.lock().push((batch.trigger(), batch.into_items()));
            Ok(())
        }));
        seen
    }

    #[test]
    fn size_trigger_flushes_when_batch_is_full() {
        let shared = shared_with(3, Duration::from_secs(3600));
        let seen = record_batches(&shared);

        for i in 0..7 {
            shared.accumulate(i).unwrap();
        }

        let batches = seen.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], (FlushTrigger::Size, vec![0, 1, 2]));
        assert_eq!(batches[1], (FlushTrigger::Size, vec![3, 4, 5]));
        assert_eq!(shared.current_len.load(Ordering::Acquire), 1);
    }

    #[test]
    fn age_trigger_skips_fresh_batches() {
        let shared = shared_with(100, Duration::from_millis(20));
        let seen = record_batches(&shared);
        shared.restart_clock();
        shared.accumulate(1).unwrap();

        assert!(!shared.try_flush(FlushTrigger::Age));
        thread::sleep(Duration::from_millis(30));
        assert!(shared.try_flush(FlushTrigger::Age));
        assert_eq!(*seen.lock(), vec![(FlushTrigger::Age, vec![1])]);
    }

    #[test]
    fn expired_empty_batch_is_not_delivered() {
        let shared = shared_with(10, Duration::from_millis(1));
        let seen = record_batches(&shared);
        thread::sleep(Duration::from_millis(5));

        assert!(!shared.try_flush(FlushTrigger::Age));
        assert!(seen.lock().is_empty());
        // The deadline moved forward with the fresh batch.
        assert!(!shared.due_hint(FlushTrigger::Age));
    }

    #[test]
    fn racing_triggers_flush_each_batch_exactly_once() {
        for round in 0..200u32 {
            let shared = shared_with(4, Duration::from_millis(1));
            let seen = record_batches(&shared);
            for i in 0..4 {
                shared.current.lock().items.push(round * 4 + i);
            }
            shared.current_len.store(4, Ordering::Release);
            thread::sleep(Duration::from_millis(2));

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = [FlushTrigger::Size, FlushTrigger::Age]
                .into_iter()
                .map(|trigger| {
                    let shared = Arc::clone(&shared);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        shared.try_flush(trigger)
                    })
                })
                .collect();
            let flushed: usize = handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum();

            assert_eq!(flushed, 1, "round {round}");
            let batches = seen.lock();
            assert_eq!(batches.len(), 1, "round {round}");
            assert_eq!(batches[0].1, (round * 4..round * 4 + 4).collect::<Vec<_>>());
        }
    }

    #[test]
    fn sequences_follow_flush_order() {
        let shared = shared_with(2, Duration::from_secs(3600));
        let sequences = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sequences);
        *shared.handler.write() = Some(Arc::new(move |batch: Batch<u32>| -> HandlerResult {
            sink.lock().push(batch.sequence());
            Ok(())
        }));
        for i in 0..8 {
            shared.accumulate(i).unwrap();
        }
        assert_eq!(*sequences.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn slow_handler_does_not_block_other_flushes() {
        let shared = shared_with(1, Duration::from_secs(3600));
        let (entered_tx, entered_rx) = flume::bounded(1);
        let (release_tx, release_rx) = flume::bounded::<()>(1);
        let sequences = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sequences);
        *shared.handler.write() = Some(Arc::new(move |batch: Batch<u32>| -> HandlerResult {
            sink.lock().push(batch.sequence());
            if batch.sequence() == 0 {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            }
            Ok(())
        }));

        let first = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || shared.accumulate(1))
        };
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        // Batch 0 is still in its handler: the next flush queues and returns.
        let started = Instant::now();
        shared.accumulate(2).unwrap();
        shared.restart_clock();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(*sequences.lock(), vec![0]);

        release_tx.send(()).unwrap();
        first.join().unwrap().unwrap();
        // The thread already delivering picked up batch 1.
        assert_eq!(*sequences.lock(), vec![0, 1]);
        assert!(shared.outbox.lock().is_empty());
    }

    #[test]
    fn missing_handler_drops_and_counts_the_batch() {
        let shared = shared_with(1, Duration::from_secs(3600));
        shared.accumulate(5).unwrap();
        let stats = shared.stats.snapshot();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn running_state_requires_a_running_drain_loop() {
        let worker: BatchWorker<u32> = BatchWorker::new("paired", Arc::new(NullLog));
        for _ in 0..3 {
            worker.start();
            worker.start();
            assert!(worker.is_running());
            assert!(worker.items.is_running());
            worker.stop();
            assert!(!worker.is_running());
            assert!(!worker.items.is_running());
        }
    }

    #[test]
    fn restart_keeps_partial_batch() {
        let worker = BatchWorker::with_config(
            "restart",
            Arc::new(NullLog),
            BatchWorkerConfig {
                max_batch_size: 3,
                max_batch_age: Duration::from_secs(3600),
                ..Default::default()
            },
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        worker.set_batch_handler(move |batch: Batch<u32>| {
            sink.lock().push(batch.into_items());
            Ok(())
        });

        worker.start();
        worker.enqueue(1);
        worker.enqueue(2);
        let deadline = Instant::now() + Duration::from_secs(2);
        while worker.current_batch_len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        worker.stop();
        assert_eq!(worker.current_batch_len(), 2);
        assert!(seen.lock().is_empty());

        worker.start();
        worker.enqueue(3);
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(*seen.lock(), vec![vec![1, 2, 3]]);
    }
}
