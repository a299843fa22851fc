#![allow(dead_code)]

use std::error::Error;
use std::sync::{Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use blipbatch::ErrorLog;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        blipbatch::logging::init_logging();
    });
}

/// Polls `cond` every 2ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reported {
    pub component: String,
    pub operation: String,
    pub context: String,
    pub error: String,
}

/// Error log that keeps every report for later inspection.
#[derive(Default)]
pub struct RecordingLog {
    pub reports: Mutex<Vec<Reported>>,
}

impl RecordingLog {
    pub fn snapshot(&self) -> Vec<Reported> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorLog for RecordingLog {
    fn write_error(&self, component: &str, operation: &str, context: &str, error: &dyn Error) {
        self.reports.lock().unwrap().push(Reported {
            component: component.to_owned(),
            operation: operation.to_owned(),
            context: context.to_owned(),
            error: error.to_string(),
        });
    }
}
