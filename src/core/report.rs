//! Error-reporting collaborator used by the background loops.
//!
//! Workers never surface loop faults to their callers. Every failure is handed
//! to an [`ErrorLog`] instead, and the call itself is guarded so that a
//! misbehaving log can never take a loop down with it.

use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;

use flume::{Receiver, Sender};
use tracing::{debug, error};

/// Narrow error-reporting contract consumed by the workers.
///
/// Implementations must be cheap and must not block; a worker calls this from
/// its drain or age-monitor thread.
pub trait ErrorLog: Send + Sync {
    fn write_error(&self, component: &str, operation: &str, context: &str, error: &dyn Error);
}

impl<L: ErrorLog + ?Sized> ErrorLog for Arc<L> {
    fn write_error(&self, component: &str, operation: &str, context: &str, error: &dyn Error) {
        (**self).write_error(component, operation, context, error)
    }
}

/// Best-effort notify: swallows anything the log itself does wrong.
pub(crate) fn notify(
    log: &dyn ErrorLog,
    component: &str,
    operation: &str,
    context: &str,
    error: &dyn Error,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        log.write_error(component, operation, context, error)
    }));
    if outcome.is_err() {
        debug!(component, operation, "error log panicked; report discarded");
    }
}

/// Default collaborator: one `tracing` error event per report.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl ErrorLog for TracingLog {
    fn write_error(&self, component: &str, operation: &str, context: &str, err: &dyn Error) {
        error!(component, operation, context, error = %err, "worker fault");
    }
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl ErrorLog for NullLog {
    fn write_error(&self, _: &str, _: &str, _: &str, _: &dyn Error) {}
}

/// An owned copy of one report, as carried by [`ChannelLog`].
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub component: String,
    pub operation: String,
    pub context: String,
    pub message: String,
    pub at: SystemTime,
}

/// Asynchronous collaborator: reports are queued on a bounded channel and
/// written out later by [`ChannelLog::drain`].
///
/// A full or disconnected channel drops the record.
#[derive(Debug, Clone)]
pub struct ChannelLog {
    tx: Sender<ErrorRecord>,
}

impl ChannelLog {
    pub fn bounded(capacity: usize) -> (Self, Receiver<ErrorRecord>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Forwards queued records to `tracing` until every sender is gone.
    pub async fn drain(rx: Receiver<ErrorRecord>) -> usize {
        let mut written = 0;
        while let Ok(record) = rx.recv_async().await {
            error!(
                component = %record.component,
                operation = %record.operation,
                context = %record.context,
                error = %record.message,
                "worker fault"
            );
            written += 1;
        }
        written
    }
}

impl ErrorLog for ChannelLog {
    fn write_error(&self, component: &str, operation: &str, context: &str, err: &dyn Error) {
        let record = ErrorRecord {
            component: component.to_owned(),
            operation: operation.to_owned(),
            context: context.to_owned(),
            message: err.to_string(),
            at: SystemTime::now(),
        };
        // Full or disconnected: the record is dropped.
        let _ = self.tx.try_send(record);
    }
}
