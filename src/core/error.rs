use std::any::Any;
use std::io;

use thiserror::Error;

/// Error type user handlers return to signal a failed item or batch.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by item and batch handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Faults raised inside the background loops.
///
/// None of these ever reach the caller of `enqueue`/`start`/`stop`; they are
/// handed to the worker's [`ErrorLog`](crate::core::report::ErrorLog) and
/// counted in its stats.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("handler failed: {source}")]
    Handler {
        #[source]
        source: HandlerError,
    },
    #[error("no handler installed")]
    MissingHandler,
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
    #[error("worker loop panicked: {0}")]
    LoopPanicked(String),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

impl WorkerError {
    pub(crate) fn handler(source: HandlerError) -> Self {
        WorkerError::Handler { source }
    }
}

/// Extracts a printable message from a `catch_unwind` payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
