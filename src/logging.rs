//! Per-client log mirror.
//!
//! Every benchmark client owns an append-only log that is exposed verbatim
//! over `GET /benchmark/:id/log`. Code on a client's request or benchmark
//! path logs through a [`ClientLog`] handle, which emits the line through
//! `tracing` as usual and also appends it to the owning client's buffer.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;

/// Append-only in-memory log owned by one benchmark client.
///
/// Cloning is cheap and shares the underlying buffer, so the request client,
/// the benchmark pipeline, and the scheduler task all write to the same log.
#[derive(Clone, Default)]
pub struct ClientLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl ClientLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, level: &str, message: &str) {
        let line = format!("{} {:5} {}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"), level, message);
        self.lines.lock().push(line);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!("{message}");
        self.append("INFO", message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!("{message}");
        self.append("WARN", message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!("{message}");
        self.append("ERROR", message);
    }

    /// Render the log as the plain-text document served over HTTP.
    pub fn render(&self) -> String {
        let lines = self.lines.lock();
        let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }
}
