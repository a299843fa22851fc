//! Single-consumer FIFO worker.
//!
//! Producers call [`ItemWorker::enqueue`] from any thread; one dedicated drain
//! loop removes up to `max_items_per_iteration` items at a time and runs the
//! handler on each of them, in enqueue order, outside the queue lock.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::core::error::{panic_message, HandlerResult, WorkerError};
use crate::core::lifecycle::{spawn_loop, StopSignal, WorkerState};
use crate::core::queue::{OverflowPolicy, PendingQueue, PushOutcome};
use crate::core::report::{notify, ErrorLog};
use crate::core::stats::{ItemStats, ItemStatsSnapshot};

/// Per-item callback.
pub type ItemHandler<T> = Arc<dyn Fn(T) -> HandlerResult + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ItemWorkerConfig {
    /// Upper bound on items taken from the queue per drain iteration.
    pub max_items_per_iteration: usize,
    /// Pause between drain iterations.
    pub poll_interval: Duration,
    /// `None` keeps the queue unbounded.
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl Default for ItemWorkerConfig {
    fn default() -> Self {
        Self {
            max_items_per_iteration: 1000,
            poll_interval: Duration::from_millis(5),
            capacity: None,
            overflow: OverflowPolicy::DropNew,
        }
    }
}

impl ItemWorkerConfig {
    pub(crate) fn normalized(self) -> Self {
        Self {
            max_items_per_iteration: self.max_items_per_iteration.max(1),
            poll_interval: self.poll_interval.max(Duration::from_millis(1)),
            ..self
        }
    }
}

struct Shared<T> {
    name: String,
    queue: PendingQueue<T>,
    handler: RwLock<Option<ItemHandler<T>>>,
    log: Arc<dyn ErrorLog>,
    stats: ItemStats,
    max_items_per_iteration: usize,
    // Held for a whole drain iteration so a loop that is still winding down
    // after stop() never runs alongside the one a later start() spawned.
    drain_gate: Mutex<()>,
    overflowing: AtomicBool,
}

impl<T> Shared<T> {
    fn drain_once(&self) {
        let _gate = self.drain_gate.lock();
        if self.queue.len() == 0 {
            return;
        }
        // Items stay queued until a handler is installed.
        let Some(handler) = self.handler.read().clone() else {
            return;
        };

        let items = self.queue.take(self.max_items_per_iteration);
        let count = items.len();
        trace!(worker = %self.name, count, "drain iteration");

        for (index, item) in items.into_iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(item)));
            let fault = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(source)) => WorkerError::handler(source),
                Err(payload) => WorkerError::HandlerPanicked(panic_message(payload.as_ref())),
            };
            self.stats.on_failure();
            self.report(
                "handle_item",
                &format!("item {} of {} in iteration", index + 1, count),
                &fault,
            );
        }
        self.stats.on_iteration(count);
    }

    fn report(&self, operation: &str, context: &str, err: &WorkerError) {
        notify(self.log.as_ref(), &self.name, operation, context, err);
    }
}

/// Background worker delivering items one at a time, in FIFO order, on a
/// single dedicated thread.
///
/// `stop()` does not drain: items still queued stay queued and are handled
/// after the next `start()`. Dropping the worker stops its loop.
pub struct ItemWorker<T> {
    shared: Arc<Shared<T>>,
    poll_interval: Duration,
    running: Mutex<Option<StopSignal>>,
}

impl<T: Send + 'static> ItemWorker<T> {
    pub fn new(name: impl Into<String>, log: Arc<dyn ErrorLog>) -> Self {
        Self::with_config(name, log, ItemWorkerConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        log: Arc<dyn ErrorLog>,
        config: ItemWorkerConfig,
    ) -> Self {
        let config = config.normalized();
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                queue: PendingQueue::new(config.capacity, config.overflow),
                handler: RwLock::new(None),
                log,
                stats: ItemStats::default(),
                max_items_per_iteration: config.max_items_per_iteration,
                drain_gate: Mutex::new(()),
                overflowing: AtomicBool::new(false),
            }),
            poll_interval: config.poll_interval,
            running: Mutex::new(None),
        }
    }

    /// Installs the per-item callback. Intended to be called once, before
    /// `start()`; a replacement takes effect from the next drain iteration.
    pub fn set_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(T) -> HandlerResult + Send + Sync + 'static,
    {
        *self.shared.handler.write() = Some(Arc::new(handler));
        self
    }

    /// Appends `item` to the tail of the queue. Never waits on the handler.
    pub fn enqueue(&self, item: T) {
        let shared = &self.shared;
        match shared.queue.push(item) {
            PushOutcome::Accepted => {
                shared.stats.on_enqueue();
                shared.overflowing.store(false, Ordering::Relaxed);
            }
            outcome => {
                if outcome == PushOutcome::EvictedOldest {
                    shared.stats.on_enqueue();
                }
                shared.stats.on_drop();
                if !shared.overflowing.swap(true, Ordering::Relaxed) {
                    warn!(worker = %shared.name, ?outcome, "queue full, dropping items");
                }
            }
        }
    }

    /// Spawns the drain loop. No-op while already running.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let fault_shared = Arc::clone(&self.shared);
        let spawned = spawn_loop(
            format!("{}-drain", self.shared.name),
            self.poll_interval,
            move || shared.drain_once(),
            move |err| fault_shared.report("drain_loop", "drain iteration aborted", &err),
        );

        match spawned {
            Ok(signal) => {
                *running = Some(signal);
                debug!(worker = %self.shared.name, "item worker started");
            }
            Err(e) => {
                self.shared
                    .report("start", "spawning drain thread", &WorkerError::Spawn(e));
            }
        }
    }

    /// Signals the drain loop to exit at its next iteration boundary.
    /// Does not wait for an in-flight handler. No-op while stopped.
    pub fn stop(&self) {
        if self.running.lock().take().is_some() {
            debug!(worker = %self.shared.name, pending = self.len(), "item worker stopped");
        }
    }

    pub fn state(&self) -> WorkerState {
        if self.running.lock().is_some() {
            WorkerState::Running
        } else {
            WorkerState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Items waiting in the queue.
    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn stats(&self) -> ItemStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::NullLog;
    use std::collections::HashSet;
    use std::error::Error;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingLog {
        entries: Mutex<Vec<(String, String, String)>>,
    }

    impl ErrorLog for RecordingLog {
        fn write_error(&self, component: &str, operation: &str, _: &str, err: &dyn Error) {
            self.entries
                .lock()
                .push((component.into(), operation.into(), err.to_string()));
        }
    }

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn collecting_worker(config: ItemWorkerConfig) -> (ItemWorker<u32>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let worker = ItemWorker::with_config("test", Arc::new(NullLog), config);
        worker.set_handler(move |item| {
            sink.lock().push(item);
            Ok(())
        });
        (worker, seen)
    }

    #[test]
    fn items_are_handled_in_enqueue_order() {
        let (worker, seen) = collecting_worker(ItemWorkerConfig::default());
        for i in 0..500 {
            worker.enqueue(i);
        }
        worker.start();

        assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 500));
        assert_eq!(*seen.lock(), (0..500).collect::<Vec<_>>());
        assert_eq!(worker.stats().processed, 500);
    }

    #[test]
    fn iterations_are_capped_by_max_items() {
        let config = ItemWorkerConfig {
            max_items_per_iteration: 10,
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        };
        let (worker, seen) = collecting_worker(config);
        for i in 0..35 {
            worker.enqueue(i);
        }
        worker.start();

        assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 35));
        assert!(worker.stats().iterations >= 4);
    }

    #[test]
    fn failing_and_panicking_items_do_not_stop_the_loop() {
        let log = Arc::new(RecordingLog::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let worker = ItemWorker::new("faulty", log.clone());
        worker.set_handler(move |item: u32| {
            match item {
                2 => return Err("bad item".into()),
                4 => panic!("handler blew up"),
                _ => sink.lock().push(item),
            }
            Ok(())
        });
        worker.start();
        for i in 0..6 {
            worker.enqueue(i);
        }

        assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 4));
        assert_eq!(*seen.lock(), vec![0, 1, 3, 5]);

        let entries = log.entries.lock();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|(c, op, _)| c == "faulty" && op == "handle_item"));
        assert!(entries[0].2.contains("bad item"));
        assert!(entries[1].2.contains("handler blew up"));
        assert_eq!(worker.stats().failed, 2);
    }

    #[test]
    fn double_start_runs_a_single_drain_loop() {
        let threads = Arc::new(Mutex::new(HashSet::new()));
        let seen = Arc::clone(&threads);
        let worker = ItemWorker::new("single", Arc::new(NullLog));
        worker.set_handler(move |_: u32| {
            seen.lock().insert(thread::current().id());
            Ok(())
        });
        worker.start();
        worker.start();
        assert!(worker.is_running());

        for i in 0..200 {
            worker.enqueue(i);
        }
        assert!(wait_until(Duration::from_secs(2), || worker.stats().processed == 200));
        assert_eq!(threads.lock().len(), 1);
    }

    #[test]
    fn stop_leaves_queue_intact_and_start_resumes() {
        let (worker, seen) = collecting_worker(ItemWorkerConfig::default());
        worker.start();
        worker.stop();
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);

        // Give any in-flight iteration time to finish.
        thread::sleep(Duration::from_millis(20));
        worker.enqueue(1);
        worker.enqueue(2);
        thread::sleep(Duration::from_millis(30));
        assert!(seen.lock().is_empty());
        assert_eq!(worker.len(), 2);

        worker.start();
        worker.enqueue(3);
        assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 3));
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn items_wait_for_a_handler() {
        let worker: ItemWorker<u32> = ItemWorker::new("idle", Arc::new(NullLog));
        worker.start();
        worker.enqueue(9);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(worker.len(), 1);

        let got = Arc::new(Mutex::new(None));
        let g = Arc::clone(&got);
        worker.set_handler(move |item| {
            *g.lock() = Some(item);
            Ok(())
        });
        assert!(wait_until(Duration::from_secs(2), || got.lock().is_some()));
        assert_eq!(*got.lock(), Some(9));
    }

    #[test]
    fn bounded_queue_counts_dropped_items() {
        let config = ItemWorkerConfig {
            capacity: Some(3),
            overflow: OverflowPolicy::DropOldest,
            ..Default::default()
        };
        let (worker, seen) = collecting_worker(config);
        for i in 0..5 {
            worker.enqueue(i);
        }
        let stats = worker.stats();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.enqueued, 5);

        worker.start();
        assert!(wait_until(Duration::from_secs(2), || seen.lock().len() == 3));
        assert_eq!(*seen.lock(), vec![2, 3, 4]);
    }
}
