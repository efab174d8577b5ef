//! Append-only output sink shared between a run and its observer.

use std::sync::Arc;
use tokio::sync::watch;

/// Ordered text buffer that collects everything the guest writes to
/// descriptors 1 and 2.
///
/// Cloning yields another handle to the same buffer, so the caller can keep
/// one handle while the run appends through another. Appends notify
/// subscribers as they happen.
#[derive(Debug, Clone)]
pub struct OutputSink {
    buffer: Arc<watch::Sender<String>>,
}

impl OutputSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(String::new());
        Self {
            buffer: Arc::new(tx),
        }
    }

    /// Append text to the end of the buffer.
    pub fn append(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.buffer.send_modify(|buf| buf.push_str(text));
    }

    /// Current contents of the buffer.
    pub fn snapshot(&self) -> String {
        self.buffer.borrow().clone()
    }

    /// Subscribe to updates. The receiver sees the whole buffer on each change.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.buffer.subscribe()
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.buffer.borrow().len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear the buffer. Called once by the host at the start of a run.
    pub(crate) fn reset(&self) {
        self.buffer.send_modify(String::clear);
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::new()
    }
}
