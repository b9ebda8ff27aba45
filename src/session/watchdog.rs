//! Inactivity watchdog.
//!
//! Detects "no new partial text for N seconds" without knowing anything
//! about the recognition engine. The deadline rearms only when the observed
//! text actually changes; an engine that repeats the same partial forever
//! still times out.

use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

enum WatchdogMsg {
    TextChanged(String),
    Stop,
}

struct Armed {
    tx: Sender<WatchdogMsg>,
    worker: JoinHandle<()>,
}

/// One owned watchdog instance per session. `start` arms a deadline,
/// `on_text_changed` pushes activity, `stop` disarms and joins; after
/// `stop` returns the timeout callback can no longer fire.
#[derive(Default)]
pub struct InactivityWatchdog {
    inner: Option<Armed>,
}

impl InactivityWatchdog {
    pub fn new() -> Self {
        Self { inner: None }
    }

    pub fn is_armed(&self) -> bool {
        self.inner.is_some()
    }

    /// Arms the deadline at `now + timeout`. An already-armed watchdog is
    /// disarmed first.
    pub fn start(&mut self, timeout: Duration, on_timeout: Box<dyn FnOnce() + Send>) {
        self.stop();
        if timeout.is_zero() {
            return;
        }

        let (tx, rx) = unbounded::<WatchdogMsg>();
        let worker = std::thread::spawn(move || {
            let mut deadline = Instant::now() + timeout;
            let mut last_text: Option<String> = None;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    on_timeout();
                    return;
                }
                match rx.recv_timeout(deadline - now) {
                    Ok(WatchdogMsg::TextChanged(text)) => {
                        // A repeat of the last text must not push the
                        // deadline out.
                        if last_text.as_deref() != Some(text.as_str()) {
                            last_text = Some(text);
                            deadline = Instant::now() + timeout;
                        }
                    }
                    Ok(WatchdogMsg::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => {
                        on_timeout();
                        return;
                    }
                }
            }
        });

        self.inner = Some(Armed { tx, worker });
    }

    /// Reports the current display text. No-op while disarmed.
    pub fn on_text_changed(&self, text: &str) {
        if let Some(armed) = &self.inner {
            let _ = armed.tx.send(WatchdogMsg::TextChanged(text.to_string()));
        }
    }

    /// Disarms and joins the worker. Idempotent.
    pub fn stop(&mut self) {
        if let Some(armed) = self.inner.take() {
            let _ = armed.tx.send(WatchdogMsg::Stop);
            let _ = armed.worker.join();
        }
    }
}

impl Drop for InactivityWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
