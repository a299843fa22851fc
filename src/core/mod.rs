//! Worker core: the FIFO item worker and the batch worker layered on it.

pub mod batch;
pub mod batch_worker;
pub mod error;
pub mod item_worker;
pub mod lifecycle;
pub mod queue;
pub mod report;
pub mod stats;

pub use batch::{Batch, FlushTrigger};
pub use batch_worker::{BatchHandler, BatchWorker, BatchWorkerConfig};
pub use error::{HandlerError, HandlerResult, WorkerError};
pub use item_worker::{ItemHandler, ItemWorker, ItemWorkerConfig};
pub use lifecycle::WorkerState;
pub use queue::OverflowPolicy;
pub use report::{ChannelLog, ErrorLog, ErrorRecord, NullLog, TracingLog};
pub use stats::{BatchStatsSnapshot, ItemStatsSnapshot};
