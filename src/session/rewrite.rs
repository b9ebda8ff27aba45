//! Text rewrite step.
//!
//! The session hands finished raw text to a rewriter (an external command,
//! typically an LLM wrapper) and falls back to the raw text when the
//! rewrite fails or times out. The dispatcher runs each call off the
//! control context and posts exactly one outcome per ticket back onto it.

use crate::error::{Result, SottoError};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Synchronous rewrite collaborator. Called off the control context.
pub trait Rewriter: Send + Sync {
    fn rewrite(&self, text: &str) -> Result<String>;
}

/// Identity rewriter, used when no rewrite command is configured.
pub struct PassthroughRewriter;

impl Rewriter for PassthroughRewriter {
    fn rewrite(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

/// Rewriter that pipes text through an external shell command.
///
/// The command reads the raw text on stdin and writes the rewritten text
/// to stdout. Non-zero exit or empty output is a rewrite failure.
pub struct CommandRewriter {
    command: String,
}

impl CommandRewriter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Rewriter for CommandRewriter {
    fn rewrite(&self, text: &str) -> Result<String> {
        use std::io::Write;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SottoError::RewriteFailed {
                message: format!("Failed to spawn rewrite command: {}", e),
            })?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|e| SottoError::RewriteFailed {
                    message: format!("Failed to write to rewrite command: {}", e),
                })?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| SottoError::RewriteFailed {
                message: format!("Rewrite command failed: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SottoError::RewriteFailed {
                message: format!(
                    "Rewrite command exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            });
        }

        let rewritten = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if rewritten.is_empty() {
            return Err(SottoError::RewriteFailed {
                message: "Rewrite command produced no output".to_string(),
            });
        }
        Ok(rewritten)
    }
}

/// One finished rewrite, tagged with the ticket handed out at dispatch.
#[derive(Debug)]
pub struct RewriteOutcome {
    pub ticket: u64,
    pub result: Result<String>,
}

/// Runs rewrites on worker threads with a completion bound.
///
/// The session never blocks on a rewrite; it receives outcomes through the
/// channel given at construction. A rewriter that never returns is cut off
/// after `timeout` with a `RewriteTimedOut` outcome so the session cannot
/// strand in its processing state (zero disables the bound).
pub struct RewriteDispatcher {
    rewriter: Arc<dyn Rewriter>,
    timeout: Duration,
    outcomes: Sender<RewriteOutcome>,
    next_ticket: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RewriteDispatcher {
    pub fn new(
        rewriter: Arc<dyn Rewriter>,
        timeout: Duration,
        outcomes: Sender<RewriteOutcome>,
    ) -> Self {
        Self {
            rewriter,
            timeout,
            outcomes,
            next_ticket: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Starts one rewrite and returns its ticket. Exactly one outcome with
    /// that ticket will arrive on the outcome channel.
    pub fn dispatch(&self, text: String) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let rewriter = Arc::clone(&self.rewriter);
        let outcomes = self.outcomes.clone();
        let timeout = self.timeout;

        let handle = std::thread::spawn(move || {
            let (done_tx, done_rx) = bounded::<Result<String>>(1);
            let inner = std::thread::spawn(move || {
                let _ = done_tx.send(rewriter.rewrite(&text));
            });

            let result = if timeout.is_zero() {
                done_rx.recv().unwrap_or_else(|_| {
                    Err(SottoError::RewriteFailed {
                        message: "Rewrite worker vanished".to_string(),
                    })
                })
            } else {
                match done_rx.recv_timeout(timeout) {
                    Ok(result) => result,
                    Err(RecvTimeoutError::Timeout) => Err(SottoError::RewriteTimedOut {
                        seconds: timeout.as_secs(),
                    }),
                    Err(RecvTimeoutError::Disconnected) => Err(SottoError::RewriteFailed {
                        message: "Rewrite worker vanished".to_string(),
                    }),
                }
            };

            // A timed-out inner thread is abandoned; its late result has
            // nowhere to go.
            if result.is_err() {
                drop(inner);
            } else {
                let _ = inner.join();
            }
            let _ = outcomes.send(RewriteOutcome { ticket, result });
        });

        if let Ok(mut workers) = self.workers.lock() {
            workers.retain(|h| !h.is_finished());
            workers.push(handle);
        }
        ticket
    }
}

/// Scriptable rewriter for session tests.
pub struct MockRewriter {
    responses: Mutex<Vec<Result<String>>>,
    delay: Duration,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockRewriter {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues a successful response, oldest call first.
    pub fn with_response(self, text: &str) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(Ok(text.to_string()));
        }
        self
    }

    pub fn with_error(self, error: SottoError) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(Err(error));
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Raw texts received, in call order.
    pub fn calls_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

impl Default for MockRewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Rewriter for MockRewriter {
    fn rewrite(&self, text: &str) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| SottoError::RewriteFailed {
                message: "response queue poisoned".to_string(),
            })?;
        if responses.is_empty() {
            // Default behavior mirrors a passthrough.
            Ok(text.to_string())
        } else {
            responses.remove(0)
        }
    }
}
