//! Caller-facing log and progress callbacks layered over the `log` facade.

use std::fmt;

use log::{debug, info, warn};

pub type LogCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type ProgressCallback = Box<dyn Fn(f64, &str, &str) + Send + Sync>;

/// Forwards user-facing messages to `log` and, when present, to the caller's
/// callbacks.
#[derive(Default)]
pub struct Reporter {
    log: Option<LogCallback>,
    progress: Option<ProgressCallback>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.log = Some(Box::new(callback));
        self
    }

    pub fn with_progress(
        mut self,
        callback: impl Fn(f64, &str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn info(&self, message: &str) {
        info!("{message}");
        self.forward(message);
    }

    pub fn warn(&self, message: &str) {
        warn!("{message}");
        self.forward(message);
    }

    pub fn progress(&self, fraction: f64, phase: &str, detail: &str) {
        debug!("[{:>3.0}%] {phase}: {detail}", fraction * 100.0);
        if let Some(callback) = &self.progress {
            callback(fraction.clamp(0.0, 1.0), phase, detail);
        }
    }

    fn forward(&self, message: &str) {
        if let Some(callback) = &self.log {
            callback(message);
        }
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("log", &self.log.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
