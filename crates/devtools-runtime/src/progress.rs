//! User-visible progress notifications.
//!
//! Hot reload drives two notifications through their phases; the embedder
//! decides how they render. The CLI logs them, an editor front-end would
//! show real progress toasts, tests record them.

use std::sync::{Arc, Mutex};
use tracing::info;

pub trait ProgressSink: Send + Sync {
    /// Open a titled notification and return the handle that drives it.
    fn begin(&self, title: &str) -> Box<dyn ProgressTask>;
}

pub trait ProgressTask: Send + Sync {
    fn report(&self, message: &str);

    /// Close the notification with a final message.
    fn finish(&self, message: &str);
}

/// Renders progress as structured log lines.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn begin(&self, title: &str) -> Box<dyn ProgressTask> {
        info!(task = %title, "progress started");
        Box::new(TracingTask {
            title: title.to_string(),
        })
    }
}

struct TracingTask {
    title: String,
}

impl ProgressTask for TracingTask {
    fn report(&self, message: &str) {
        info!(task = %self.title, "{}", message);
    }

    fn finish(&self, message: &str) {
        info!(task = %self.title, "{}", message);
    }
}

/// Captures every event for assertions.
#[derive(Clone, Default)]
pub struct RecordingProgress {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("progress log poisoned").clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn begin(&self, title: &str) -> Box<dyn ProgressTask> {
        self.events
            .lock()
            .expect("progress log poisoned")
            .push(format!("begin {}", title));
        Box::new(RecordingTask {
            title: title.to_string(),
            events: self.events.clone(),
        })
    }
}

struct RecordingTask {
    title: String,
    events: Arc<Mutex<Vec<String>>>,
}

impl ProgressTask for RecordingTask {
    fn report(&self, message: &str) {
        self.events
            .lock()
            .expect("progress log poisoned")
            .push(format!("{}: {}", self.title, message));
    }

    fn finish(&self, message: &str) {
        self.events
            .lock()
            .expect("progress log poisoned")
            .push(format!("{}: done: {}", self.title, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_progress_captures_phases() {
        let sink = RecordingProgress::new();
        let task = sink.begin("Extension");
        task.report("Rebuilding…");
        task.finish("Client reconnected ✅");

        assert_eq!(
            sink.events(),
            vec![
                "begin Extension",
                "Extension: Rebuilding…",
                "Extension: done: Client reconnected ✅",
            ]
        );
    }

    #[test]
    fn test_concurrent_tasks_interleave() {
        let sink = RecordingProgress::new();
        let ext = sink.begin("Extension");
        let mcp = sink.begin("MCP Server");
        ext.report("Rebuilding…");
        mcp.report("Rebuilding…");

        let events = sink.events();
        assert!(events.contains(&"Extension: Rebuilding…".to_string()));
        assert!(events.contains(&"MCP Server: Rebuilding…".to_string()));
    }
}
