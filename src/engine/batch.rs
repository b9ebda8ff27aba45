//! Batch recognition engine.
//!
//! Audio is accumulated while listening and transcribed in one inference
//! pass on stop. The accumulation buffer has its own lock, separate from
//! the model lifecycle state, so the capture context never waits on model
//! loading. The engine owns the cleanup pipeline: every inference result
//! goes through the hallucination filter before it reaches the session,
//! and recent accepted texts can be fed back as decoder prompt context.

use crate::audio::{AudioFrame, resample_linear, samples_to_f32};
use crate::defaults;
use crate::engine::{EngineShared, RecognitionEngine, RecognitionEvent, RecognitionUpdate};
use crate::error::{Result, SottoError};
use crate::text::{ContextTokenizer, HallucinationFilter, SegmentStats, build_prompt_context};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Model lifecycle, independent of individual recognition passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    NotLoaded,
    Loading,
    Ready,
    Failed(String),
}

/// One-shot recognizer the batch engine drives.
pub trait BatchRecognizer: Send + Sync {
    /// Loads the model if not already loaded. Idempotent.
    fn ensure_loaded(&self) -> Result<()>;

    /// Transcribes 16 kHz mono f32 audio in one pass. Implementations
    /// check `cancelled` between decode steps where possible; the engine
    /// additionally discards the result of a cancelled pass.
    fn transcribe(
        &self,
        samples: &[f32],
        locale: &str,
        prompt: Option<&str>,
        cancelled: &AtomicBool,
    ) -> Result<Vec<SegmentStats>>;

    /// Tokenizes text with the model vocabulary, for prompt budgeting.
    fn tokenize(&self, text: &str) -> Result<Vec<i32>>;

    /// Whether a token id is a model special token.
    fn is_special_token(&self, token: i32) -> bool;

    /// Whether prompt context is known to be stable for this model
    /// variant. Larger variants drift when primed, so they opt out.
    fn context_stable(&self) -> bool;
}

/// Adapter exposing a recognizer's vocabulary to the context builder.
struct RecognizerTokenizer<'a>(&'a dyn BatchRecognizer);

impl ContextTokenizer for RecognizerTokenizer<'_> {
    fn tokenize(&self, text: &str) -> Result<Vec<i32>> {
        self.0.tokenize(text)
    }

    fn is_special_token(&self, token: i32) -> bool {
        self.0.is_special_token(token)
    }
}

pub struct BatchEngine {
    shared: Arc<EngineShared>,
    recognizer: Arc<dyn BatchRecognizer>,
    filter: Arc<HallucinationFilter>,
    model_state: Arc<Mutex<ModelState>>,
    // Accumulation lock, deliberately separate from model_state.
    samples: Arc<Mutex<Vec<f32>>>,
    prompt_texts: Mutex<Vec<String>>,
    locale: Mutex<String>,
    inflight: Mutex<Option<Arc<AtomicBool>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BatchEngine {
    pub fn new(
        recognizer: Arc<dyn BatchRecognizer>,
        filter: HallucinationFilter,
        events: Sender<RecognitionUpdate>,
    ) -> Self {
        Self {
            shared: EngineShared::new(events),
            recognizer,
            filter: Arc::new(filter),
            model_state: Arc::new(Mutex::new(ModelState::NotLoaded)),
            samples: Arc::new(Mutex::new(Vec::new())),
            prompt_texts: Mutex::new(Vec::new()),
            locale: Mutex::new(defaults::DEFAULT_LOCALE.to_string()),
            inflight: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn model_state(&self) -> ModelState {
        self.model_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(ModelState::NotLoaded)
    }

    fn track_worker(&self, handle: JoinHandle<()>) {
        if let Ok(mut workers) = self.workers.lock() {
            workers.retain(|h| !h.is_finished());
            workers.push(handle);
        }
    }

    /// Kicks off a background model load unless one is already done or
    /// under way. A load failure surfaces as an error event tagged with
    /// `generation`.
    fn ensure_model(&self, generation: u64) {
        {
            let mut state = match self.model_state.lock() {
                Ok(s) => s,
                Err(_) => return,
            };
            match &*state {
                ModelState::Ready | ModelState::Loading => return,
                ModelState::Failed(message) => {
                    self.shared.post(
                        generation,
                        RecognitionEvent::Error(SottoError::RecognizerUnavailable {
                            message: message.clone(),
                        }),
                    );
                    return;
                }
                ModelState::NotLoaded => *state = ModelState::Loading,
            }
        }

        let recognizer = Arc::clone(&self.recognizer);
        let model_state = Arc::clone(&self.model_state);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::spawn(move || {
            let outcome = recognizer.ensure_loaded();
            let mut state = match model_state.lock() {
                Ok(s) => s,
                Err(_) => return,
            };
            match outcome {
                Ok(()) => *state = ModelState::Ready,
                Err(e) => {
                    let message = e.to_string();
                    *state = ModelState::Failed(message);
                    shared.post(generation, RecognitionEvent::Error(e));
                }
            }
        });
        self.track_worker(handle);
    }
}

/// Spin-waits for the model load to settle. Returns an error when loading
/// failed, None-equivalent (Ok) when ready, or gives up on cancellation.
fn wait_for_model(
    model_state: &Mutex<ModelState>,
    cancelled: &AtomicBool,
) -> std::result::Result<(), Option<SottoError>> {
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return Err(None);
        }
        let snapshot = match model_state.lock() {
            Ok(s) => s.clone(),
            Err(_) => return Err(None),
        };
        match snapshot {
            ModelState::Ready => return Ok(()),
            ModelState::Failed(message) => {
                return Err(Some(SottoError::RecognizerUnavailable { message }));
            }
            ModelState::NotLoaded | ModelState::Loading => {
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

impl RecognitionEngine for BatchEngine {
    fn is_streaming(&self) -> bool {
        false
    }

    fn supports_prompt_context(&self) -> bool {
        self.recognizer.context_stable()
    }

    fn set_prompt_context(&self, texts_newest_first: Vec<String>) {
        if !self.supports_prompt_context() {
            return;
        }
        if let Ok(mut prompt) = self.prompt_texts.lock() {
            *prompt = texts_newest_first;
        }
    }

    fn start_recognition(&self, locale: &str) -> u64 {
        let generation = self.shared.next_generation();
        if let Ok(mut stored) = self.locale.lock() {
            *stored = locale.to_string();
        }
        if let Ok(mut samples) = self.samples.lock() {
            samples.clear();
        }
        self.ensure_model(generation);
        generation
    }

    fn feed_audio(&self, frame: &AudioFrame) {
        let f32s = samples_to_f32(&frame.samples);
        let resampled = resample_linear(&f32s, frame.sample_rate, defaults::SAMPLE_RATE);
        if let Ok(mut samples) = self.samples.lock() {
            samples.extend_from_slice(&resampled);
        }
    }

    fn stop_recognition(&self) {
        let generation = self.shared.current_generation();

        let audio: Vec<f32> = match self.samples.lock() {
            Ok(mut samples) => std::mem::take(&mut *samples),
            Err(_) => return,
        };
        let prompt_texts: Vec<String> = self
            .prompt_texts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default();
        let locale = self
            .locale
            .lock()
            .map(|l| l.clone())
            .unwrap_or_else(|_| defaults::DEFAULT_LOCALE.to_string());

        let cancelled = Arc::new(AtomicBool::new(false));
        if let Ok(mut inflight) = self.inflight.lock() {
            *inflight = Some(Arc::clone(&cancelled));
        }

        let recognizer = Arc::clone(&self.recognizer);
        let filter = Arc::clone(&self.filter);
        let model_state = Arc::clone(&self.model_state);
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::spawn(move || {
            match wait_for_model(&model_state, &cancelled) {
                Ok(()) => {}
                Err(Some(e)) => {
                    shared.post(generation, RecognitionEvent::Error(e));
                    return;
                }
                Err(None) => return,
            }

            let prompt = if prompt_texts.is_empty() {
                None
            } else {
                let accepted = build_prompt_context(
                    &prompt_texts,
                    &RecognizerTokenizer(recognizer.as_ref()),
                    defaults::CONTEXT_TOKEN_BUDGET,
                );
                if accepted.is_empty() {
                    None
                } else {
                    Some(accepted.join(" "))
                }
            };

            let outcome = recognizer.transcribe(&audio, &locale, prompt.as_deref(), &cancelled);

            // A cancelled pass completes as a no-op regardless of outcome.
            if cancelled.load(Ordering::SeqCst) {
                return;
            }

            match outcome {
                Ok(segments) => {
                    let text = filter.clean_segments(&segments);
                    shared.post(
                        generation,
                        RecognitionEvent::Final {
                            text,
                            user_initiated: true,
                        },
                    );
                }
                Err(e) => shared.post(generation, RecognitionEvent::Error(e)),
            }
        });
        self.track_worker(handle);
    }

    fn cancel_recognition(&self) {
        self.shared.invalidate();
        if let Ok(mut inflight) = self.inflight.lock()
            && let Some(flag) = inflight.take()
        {
            flag.store(true, Ordering::SeqCst);
        }
        if let Ok(mut samples) = self.samples.lock() {
            samples.clear();
        }
        if let Ok(mut prompt) = self.prompt_texts.lock() {
            prompt.clear();
        }
    }
}

impl Drop for BatchEngine {
    fn drop(&mut self) {
        self.cancel_recognition();
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

/// Scriptable recognizer for engine and session tests.
pub struct MockBatchRecognizer {
    segments: Mutex<Vec<Vec<SegmentStats>>>,
    load_error: Mutex<Option<SottoError>>,
    transcribe_error: Mutex<Option<SottoError>>,
    context_stable: bool,
    load_delay: Duration,
    seen: Arc<MockBatchSeen>,
}

/// Observation handle for assertions after the fact.
#[derive(Default)]
pub struct MockBatchSeen {
    pub prompts: Mutex<Vec<Option<String>>>,
    pub sample_counts: Mutex<Vec<usize>>,
    pub transcribe_calls: std::sync::atomic::AtomicUsize,
}

impl MockBatchRecognizer {
    pub fn new() -> Self {
        Self {
            segments: Mutex::new(Vec::new()),
            load_error: Mutex::new(None),
            transcribe_error: Mutex::new(None),
            context_stable: false,
            load_delay: Duration::ZERO,
            seen: Arc::new(MockBatchSeen::default()),
        }
    }

    /// Queues segments for the next transcription, oldest call first.
    pub fn with_result(self, segments: Vec<SegmentStats>) -> Self {
        if let Ok(mut queue) = self.segments.lock() {
            queue.push(segments);
        }
        self
    }

    /// Shorthand for a single confident segment.
    pub fn with_text(self, text: &str) -> Self {
        self.with_result(vec![SegmentStats::new(text, 0.0, -0.1)])
    }

    pub fn with_load_error(self, error: SottoError) -> Self {
        if let Ok(mut slot) = self.load_error.lock() {
            *slot = Some(error);
        }
        self
    }

    pub fn with_transcribe_error(self, error: SottoError) -> Self {
        if let Ok(mut slot) = self.transcribe_error.lock() {
            *slot = Some(error);
        }
        self
    }

    pub fn with_context_stable(mut self) -> Self {
        self.context_stable = true;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn seen(&self) -> Arc<MockBatchSeen> {
        Arc::clone(&self.seen)
    }
}

impl Default for MockBatchRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRecognizer for MockBatchRecognizer {
    fn ensure_loaded(&self) -> Result<()> {
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }
        match self.load_error.lock() {
            Ok(mut slot) => match slot.take() {
                Some(e) => Err(e),
                None => Ok(()),
            },
            Err(_) => Ok(()),
        }
    }

    fn transcribe(
        &self,
        samples: &[f32],
        _locale: &str,
        prompt: Option<&str>,
        _cancelled: &AtomicBool,
    ) -> Result<Vec<SegmentStats>> {
        self.seen
            .transcribe_calls
            .fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.seen.prompts.lock() {
            prompts.push(prompt.map(|p| p.to_string()));
        }
        if let Ok(mut counts) = self.seen.sample_counts.lock() {
            counts.push(samples.len());
        }
        if let Ok(mut slot) = self.transcribe_error.lock()
            && let Some(e) = slot.take()
        {
            return Err(e);
        }
        let mut queue = self
            .segments
            .lock()
            .map_err(|_| SottoError::RecognitionFailed {
                message: "segment queue poisoned".to_string(),
            })?;
        if queue.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(queue.remove(0))
        }
    }

    fn tokenize(&self, text: &str) -> Result<Vec<i32>> {
        // One token per whitespace-separated word.
        Ok(text.split_whitespace().map(|_| 1).collect())
    }

    fn is_special_token(&self, _token: i32) -> bool {
        false
    }

    fn context_stable(&self) -> bool {
        self.context_stable
    }
}
