use std::sync::Mutex;
use tracing::info;

/// Job progress reporting consumed by the dispatchers and plugins.
pub trait StatusSink: Send + Sync {
    /// Short progress line shown to the operator.
    fn post_status(&self, message: &str);

    /// Persist a warning or error line with the job record.
    fn save_job_info(&self, message: &str);
}

/// Sink that only logs.
#[derive(Debug, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn post_status(&self, message: &str) {
        info!(target: "status", "[Status] {}", message);
    }

    fn save_job_info(&self, _message: &str) {}
}

/// Sink that keeps everything in memory, used by `run` for the job summary
/// and by tests for assertions.
#[derive(Debug, Default)]
pub struct MemorySink {
    statuses: Mutex<Vec<String>>,
    job_info: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn job_info(&self) -> Vec<String> {
        self.job_info.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl StatusSink for MemorySink {
    fn post_status(&self, message: &str) {
        info!(target: "status", "[Status] {}", message);
        if let Ok(mut v) = self.statuses.lock() {
            v.push(message.to_string());
        }
    }

    fn save_job_info(&self, message: &str) {
        if let Ok(mut v) = self.job_info.lock() {
            v.push(message.to_string());
        }
    }
}
