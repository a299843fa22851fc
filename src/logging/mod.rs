use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber. Worker threads are named
/// `<worker>-drain` / `<worker>-age`, so thread names are part of every line.
///
/// Fails if a global subscriber is already set.
pub fn try_init_logging() -> Result<(), TryInitError> {
    let filter: EnvFilter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let formatting_layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .compact();

    Registry::default()
        .with(filter)
        .with(formatting_layer)
        .try_init()
}

/// Like [`try_init_logging`], ignoring an already-installed subscriber.
pub fn init_logging() {
    if try_init_logging().is_err() {
        tracing::debug!("global subscriber already set; keeping it");
    }
}
