//! Recognition engine abstraction.
//!
//! Two structurally different engines sit behind one contract: a streaming
//! engine that emits incremental partial text while audio is still flowing,
//! and a batch engine that buffers everything and runs one inference pass on
//! stop. The session orchestrator branches on declared capability
//! (`is_streaming`, `supports_prompt_context`), never on concrete type.
//!
//! Every recognition start mints a new generation number. Updates carry the
//! generation they belong to; consumers drop anything tagged with a stale
//! generation, which is how cancelled or superseded work is silenced.

pub mod batch;
pub mod streaming;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use batch::{BatchEngine, BatchRecognizer, MockBatchRecognizer, ModelState};
pub use streaming::{MockStreamingBackend, StreamingBackend, StreamingEngine};
#[cfg(feature = "whisper")]
pub use whisper::{WhisperConfig, WhisperRecognizer};

use crate::audio::AudioFrame;
use crate::error::SottoError;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One recognition outcome from an engine.
#[derive(Debug)]
pub enum RecognitionEvent {
    /// Incremental text for the active segment (streaming only).
    Partial(String),
    /// Terminal text for a recognition pass. `user_initiated` is true when
    /// the pass ended because of an explicit stop, false when the engine
    /// self-terminated at an internal utterance boundary.
    Final { text: String, user_initiated: bool },
    /// Terminal failure for a recognition pass.
    Error(SottoError),
}

/// An event tagged with the generation that produced it.
#[derive(Debug)]
pub struct RecognitionUpdate {
    pub generation: u64,
    pub event: RecognitionEvent,
}

/// Contract shared by the streaming and batch engines.
///
/// All methods take `&self`: `feed_audio` is called from the capture
/// context while control-context calls are in flight, so engines use
/// interior mutability throughout.
pub trait RecognitionEngine: Send + Sync {
    /// True when the engine emits partial text while audio flows.
    fn is_streaming(&self) -> bool;

    /// Whether `set_prompt_context` has any effect.
    fn supports_prompt_context(&self) -> bool {
        false
    }

    /// Primes the next inference with recent accepted texts, newest first.
    /// No-op unless `supports_prompt_context` is true.
    fn set_prompt_context(&self, _texts_newest_first: Vec<String>) {}

    /// Begins a recognition pass and returns its generation number.
    ///
    /// Unavailability of the underlying model is reported asynchronously as
    /// an `Error` event tagged with the returned generation, so the caller
    /// sees exactly one terminal event either way.
    fn start_recognition(&self, locale: &str) -> u64;

    /// Accepts one decoded audio frame. Capture-context safe; never blocks
    /// on recognition work.
    fn feed_audio(&self, frame: &AudioFrame);

    /// Ends audio input. Streaming: lets the in-flight pass finish and emit
    /// its final text. Batch: launches the single inference pass over the
    /// buffered audio.
    fn stop_recognition(&self);

    /// Discards all buffered and in-flight state. No event tagged with the
    /// cancelled generation fires afterward.
    fn cancel_recognition(&self);
}

/// Generation counter plus the update channel, shared between an engine's
/// control-side methods and its worker threads.
pub(crate) struct EngineShared {
    generation: AtomicU64,
    events: Sender<RecognitionUpdate>,
}

impl EngineShared {
    pub(crate) fn new(events: Sender<RecognitionUpdate>) -> Arc<Self> {
        Arc::new(Self {
            generation: AtomicU64::new(0),
            events,
        })
    }

    /// Mints the next generation and makes it current.
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidates the current generation without starting a new pass.
    /// Pending posts tagged with the old generation become stale.
    pub(crate) fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Sends an update unless its generation has been superseded.
    pub(crate) fn post(&self, generation: u64, event: RecognitionEvent) {
        if generation != self.current_generation() {
            return;
        }
        let _ = self.events.send(RecognitionUpdate { generation, event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn generations_increase_monotonically() {
        let (tx, _rx) = unbounded();
        let shared = EngineShared::new(tx);
        let a = shared.next_generation();
        let b = shared.next_generation();
        assert!(b > a);
        assert_eq!(shared.current_generation(), b);
    }

    #[test]
    fn stale_post_is_dropped() {
        let (tx, rx) = unbounded();
        let shared = EngineShared::new(tx);
        let generation = shared.next_generation();
        shared.invalidate();
        shared.post(generation, RecognitionEvent::Partial("late".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn current_post_is_delivered() {
        let (tx, rx) = unbounded();
        let shared = EngineShared::new(tx);
        let generation = shared.next_generation();
        shared.post(generation, RecognitionEvent::Partial("hello".to_string()));
        let update = rx.try_recv().unwrap();
        assert_eq!(update.generation, generation);
        match update.event {
            RecognitionEvent::Partial(text) => assert_eq!(text, "hello"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
