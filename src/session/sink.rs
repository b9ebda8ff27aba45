//! Output sinks for finished utterances.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Fire-and-forget downstream consumer of final text.
pub trait TextSink: Send + Sync {
    fn emit(&self, text: &str);
}

/// Writes each utterance as one line on stdout.
pub struct StdoutSink;

impl TextSink for StdoutSink {
    fn emit(&self, text: &str) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{}", text);
        let _ = lock.flush();
    }
}

/// Collects emitted text for assertions in tests.
#[derive(Default)]
pub struct CollectorSink {
    emitted: Arc<Mutex<Vec<String>>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.emitted)
    }
}

impl TextSink for CollectorSink {
    fn emit(&self, text: &str) {
        if let Ok(mut emitted) = self.emitted.lock() {
            emitted.push(text.to_string());
        }
    }
}
