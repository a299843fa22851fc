//! Background loop plumbing shared by the item and batch workers.
//!
//! A loop runs on its own named OS thread and owns the receiving half of a
//! stop channel. The worker keeps the sending half as a [`StopSignal`];
//! dropping it disconnects the channel, which the loop observes at its next
//! wait. Waits are `recv_timeout` on that channel, so a stop wakes the loop
//! immediately instead of after a full poll interval.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::core::error::{panic_message, WorkerError};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
}

/// Held by the worker while its loop runs; dropping it stops the loop.
#[derive(Debug)]
pub(crate) struct StopSignal {
    _tx: Sender<()>,
}

struct Ticker {
    rx: Receiver<()>,
    interval: Duration,
}

impl Ticker {
    fn is_stopped(&self) -> bool {
        self.rx.is_disconnected()
    }

    /// Waits one interval; `false` once the stop signal is gone.
    fn wait(&self) -> bool {
        match self.rx.recv_timeout(self.interval) {
            Err(RecvTimeoutError::Timeout) => true,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

/// Spawns `body` on a dedicated thread, calling it once per `interval` until
/// the returned [`StopSignal`] is dropped.
///
/// A panic escaping `body` is caught and passed to `on_fault`; the loop keeps
/// going.
pub(crate) fn spawn_loop<B, F>(
    thread_name: String,
    interval: Duration,
    mut body: B,
    on_fault: F,
) -> Result<StopSignal, io::Error>
where
    B: FnMut() + Send + 'static,
    F: Fn(WorkerError) + Send + 'static,
{
    let (tx, rx) = flume::bounded(1);
    let ticker = Ticker { rx, interval };
    let name = thread_name.clone();

    thread::Builder::new().name(thread_name).spawn(move || {
        debug!(thread = %name, "loop started");
        while !ticker.is_stopped() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(&mut body)) {
                metrics::inc_loop_faults(1);
                on_fault(WorkerError::LoopPanicked(panic_message(payload.as_ref())));
            }
            if !ticker.wait() {
                break;
            }
        }
        debug!(thread = %name, "loop exited");
    })?;

    Ok(StopSignal { _tx: tx })
}
