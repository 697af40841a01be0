//! Progress narration sinks.
//!
//! The orchestrator narrates through an injected [`ProgressSink`] instead of a
//! process-wide broadcaster, so a pipeline can run with no listener attached.

use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::traits::ProgressSink;

/// Forwards narration to `tracing` at info level
#[derive(Debug, Clone, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn narrate(&self, stage: &str, message: &str) {
        tracing::info!(stage, "{message}");
    }
}

/// Discards narration
#[derive(Debug, Clone, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn narrate(&self, _stage: &str, _message: &str) {}
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct CollectingProgress {
    lines: Mutex<Vec<String>>,
}

impl CollectingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|lines| lines.clone()).unwrap_or_default()
    }
}

impl ProgressSink for CollectingProgress {
    fn narrate(&self, stage: &str, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(format!("{stage}: {message}"));
        }
    }
}

/// Fans narration out to any number of subscribers as `[HH:MM:SS] line`.
/// Lines sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastProgress {
    sender: broadcast::Sender<String>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

impl ProgressSink for BroadcastProgress {
    fn narrate(&self, stage: &str, message: &str) {
        let timestamp = chrono::Local::now().format("%H:%M:%S");
        // send only fails when there are no receivers
        let _ = self.sender.send(format!("[{timestamp}] {stage}: {message}"));
    }
}
