//! blipbatch – single-consumer background item and batch workers.
//!
//! This crate exports
//!  * `core`    – `ItemWorker` (FIFO, one drain thread) and `BatchWorker`
//!                (size/age-bounded batches on top of it)
//!  * `config`  – TOML + env driven worker settings
//!  * `logging` – `tracing` subscriber setup
//!  * `metrics` – process-wide counters
//!
//! Producers never block on handlers, and handler failures never stop a
//! worker; they are reported through an [`ErrorLog`].

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod config;
pub mod core;
pub mod logging;
pub mod metrics;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use crate::config::{load_config, Config};
pub use crate::core::{
    Batch, BatchWorker, BatchWorkerConfig, ErrorLog, FlushTrigger, HandlerError, HandlerResult,
    ItemWorker, ItemWorkerConfig, OverflowPolicy, TracingLog, WorkerState,
};
