//! Streaming recognition engine.
//!
//! Wraps an incremental decoder behind the dual-mode engine contract. A
//! worker thread re-decodes the accumulated segment audio at a fixed
//! interval and posts partial text as it changes. When the trailing audio
//! has been silent long enough, the worker closes the segment on its own
//! and posts a non-user-initiated final, which the session answers with an
//! immediate restart.

use crate::audio::{AudioFrame, resample_linear, samples_to_f32};
use crate::defaults;
use crate::engine::{EngineShared, RecognitionEngine, RecognitionEvent, RecognitionUpdate};
use crate::error::Result;
use crossbeam_channel::Sender;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Incremental decoder the streaming engine drives.
///
/// `decode` re-transcribes the whole segment buffer each call; the engine
/// owns cadence and segment boundaries, the backend owns the model.
pub trait StreamingBackend: Send {
    /// Readies the backend for a fresh segment. Fails when the underlying
    /// model or session is unavailable.
    fn begin_segment(&mut self, locale: &str) -> Result<()>;

    /// Transcribes the segment audio accumulated so far (16 kHz mono f32).
    fn decode(&mut self, samples: &[f32]) -> Result<String>;
}

/// Flags shared between the control side and one worker pass.
struct PassFlags {
    stopping: AtomicBool,
    cancelled: AtomicBool,
}

impl PassFlags {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stopping: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }
}

pub struct StreamingEngine {
    shared: Arc<EngineShared>,
    backend: Arc<Mutex<Box<dyn StreamingBackend>>>,
    buffer: Arc<Mutex<Vec<f32>>>,
    pass: Mutex<Option<Arc<PassFlags>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    decode_interval: Duration,
}

impl StreamingEngine {
    pub fn new(backend: Box<dyn StreamingBackend>, events: Sender<RecognitionUpdate>) -> Self {
        Self {
            shared: EngineShared::new(events),
            backend: Arc::new(Mutex::new(backend)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            pass: Mutex::new(None),
            worker: Mutex::new(None),
            decode_interval: defaults::STREAMING_DECODE_INTERVAL,
        }
    }

    /// Overrides the decode cadence. Tests use a short interval.
    pub fn with_decode_interval(mut self, interval: Duration) -> Self {
        self.decode_interval = interval;
        self
    }

    /// Abandons the previous pass (if any) and reaps its thread.
    fn retire_pass(&self) {
        if let Ok(mut guard) = self.pass.lock()
            && let Some(flags) = guard.take()
        {
            flags.cancelled.store(true, Ordering::SeqCst);
        }
        if let Ok(mut guard) = self.worker.lock()
            && let Some(handle) = guard.take()
        {
            let _ = handle.join();
        }
    }
}

/// Samples that must all sit below the silence level before the worker
/// closes the segment on its own.
fn silence_tail_len() -> usize {
    (defaults::SAMPLE_RATE as u64 * defaults::STREAMING_SEGMENT_SILENCE.as_millis() as u64 / 1000)
        as usize
}

fn rms_f32(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

impl RecognitionEngine for StreamingEngine {
    fn is_streaming(&self) -> bool {
        true
    }

    fn start_recognition(&self, locale: &str) -> u64 {
        // A superseded pass is abandoned outright; its final belongs to
        // nobody.
        self.retire_pass();
        let generation = self.shared.next_generation();

        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }

        let flags = PassFlags::new();
        if let Ok(mut guard) = self.pass.lock() {
            *guard = Some(Arc::clone(&flags));
        }

        let shared = Arc::clone(&self.shared);
        let backend = Arc::clone(&self.backend);
        let buffer = Arc::clone(&self.buffer);
        let locale = locale.to_string();
        let interval = self.decode_interval;
        let tail_len = silence_tail_len();

        let handle = std::thread::spawn(move || {
            {
                let mut backend = match backend.lock() {
                    Ok(b) => b,
                    Err(_) => return,
                };
                if let Err(e) = backend.begin_segment(&locale) {
                    shared.post(generation, RecognitionEvent::Error(e));
                    return;
                }
            }

            let mut last_text = String::new();
            loop {
                std::thread::sleep(interval);

                if flags.cancelled.load(Ordering::SeqCst) {
                    return;
                }
                let stopping = flags.stopping.load(Ordering::SeqCst);

                let snapshot: Vec<f32> = match buffer.lock() {
                    Ok(buf) => buf.clone(),
                    Err(_) => return,
                };

                // Segment self-termination: the trailing window is silent
                // and we already have text. An all-silent buffer is instead
                // dropped in place so restarts do not loop on dead air.
                if !stopping && snapshot.len() >= tail_len {
                    let tail = &snapshot[snapshot.len() - tail_len..];
                    if rms_f32(tail) < defaults::STREAMING_SILENCE_RMS {
                        if last_text.is_empty() {
                            if let Ok(mut buf) = buffer.lock() {
                                buf.clear();
                            }
                            continue;
                        }
                        shared.post(
                            generation,
                            RecognitionEvent::Final {
                                text: last_text,
                                user_initiated: false,
                            },
                        );
                        return;
                    }
                }

                let decoded = {
                    let mut backend = match backend.lock() {
                        Ok(b) => b,
                        Err(_) => return,
                    };
                    backend.decode(&snapshot)
                };
                let text = match decoded {
                    Ok(text) => text,
                    Err(e) => {
                        if !flags.cancelled.load(Ordering::SeqCst) {
                            shared.post(generation, RecognitionEvent::Error(e));
                        }
                        return;
                    }
                };

                if flags.cancelled.load(Ordering::SeqCst) {
                    return;
                }

                if stopping {
                    shared.post(
                        generation,
                        RecognitionEvent::Final {
                            text,
                            user_initiated: true,
                        },
                    );
                    return;
                }

                if text != last_text {
                    shared.post(generation, RecognitionEvent::Partial(text.clone()));
                    last_text = text;
                }
            }
        });

        if let Ok(mut guard) = self.worker.lock() {
            *guard = Some(handle);
        }

        generation
    }

    fn feed_audio(&self, frame: &AudioFrame) {
        let f32s = samples_to_f32(&frame.samples);
        let resampled = resample_linear(&f32s, frame.sample_rate, defaults::SAMPLE_RATE);
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.extend_from_slice(&resampled);
        }
    }

    fn stop_recognition(&self) {
        if let Ok(guard) = self.pass.lock()
            && let Some(flags) = guard.as_ref()
        {
            flags.stopping.store(true, Ordering::SeqCst);
        }
    }

    fn cancel_recognition(&self) {
        self.shared.invalidate();
        if let Ok(mut guard) = self.pass.lock()
            && let Some(flags) = guard.take()
        {
            flags.cancelled.store(true, Ordering::SeqCst);
        }
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        self.retire_pass();
    }
}

/// Scripted backend for engine-level tests.
///
/// Returns one queued text per `decode` call, repeating the last entry once
/// the script runs out.
pub struct MockStreamingBackend {
    script: VecDeque<String>,
    last: String,
    begin_error: Option<crate::error::SottoError>,
    decode_calls: Arc<Mutex<usize>>,
}

impl MockStreamingBackend {
    pub fn new(script: &[&str]) -> Self {
        Self {
            script: script.iter().map(|s| s.to_string()).collect(),
            last: String::new(),
            begin_error: None,
            decode_calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_begin_error(mut self, error: crate::error::SottoError) -> Self {
        self.begin_error = Some(error);
        self
    }

    pub fn decode_calls_handle(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.decode_calls)
    }
}

impl StreamingBackend for MockStreamingBackend {
    fn begin_segment(&mut self, _locale: &str) -> Result<()> {
        match self.begin_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn decode(&mut self, _samples: &[f32]) -> Result<String> {
        if let Ok(mut calls) = self.decode_calls.lock() {
            *calls += 1;
        }
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        Ok(self.last.clone())
    }
}
