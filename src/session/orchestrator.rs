//! Session orchestrator.
//!
//! A three-state machine (`Idle`, `Listening`, `Processing`) that owns the
//! audio source, the recognition engine, the watchdog, and the rewrite
//! dispatcher. All state lives on the control context: the runner's select
//! loop drains command, recognition, rewrite, and watchdog channels and
//! calls the synchronous `Session` handlers one at a time. The capture
//! context touches nothing here; it only feeds audio into the engine.

use crate::audio::{AudioFrame, AudioSource};
use crate::defaults;
use crate::engine::{RecognitionEngine, RecognitionEvent, RecognitionUpdate};
use crate::error::SottoError;
use crate::session::rewrite::{RewriteDispatcher, RewriteOutcome, Rewriter};
use crate::session::sink::TextSink;
use crate::session::watchdog::InactivityWatchdog;
use crate::text::PromptContextCache;
use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Processing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Listening => write!(f, "listening"),
            SessionState::Processing => write!(f, "processing"),
        }
    }
}

/// Session tunables, produced by the config/CLI layer.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub locale: String,
    /// Watchdog deadline; zero disables it. Streaming engine only.
    pub silence_timeout: Duration,
    /// Upper bound on one rewrite call; zero means unbounded.
    pub rewrite_timeout: Duration,
    /// Minimum previous-segment length before a shrink counts as a reset.
    pub segment_reset_min_len: usize,
    /// New text shorter than `previous * ratio` signals a reset.
    pub segment_reset_ratio: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            locale: defaults::DEFAULT_LOCALE.to_string(),
            silence_timeout: defaults::SILENCE_TIMEOUT,
            rewrite_timeout: defaults::REWRITE_TIMEOUT,
            segment_reset_min_len: defaults::SEGMENT_RESET_MIN_LEN,
            segment_reset_ratio: defaults::SEGMENT_RESET_RATIO as f64,
        }
    }
}

/// Snapshot returned by status queries.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Accumulated plus in-flight text while listening, empty otherwise.
    pub text: String,
    pub last_error: Option<String>,
}

/// Control commands accepted by the runner.
pub enum SessionCommand {
    Toggle,
    Cancel,
    Status(Sender<SessionStatus>),
    Shutdown,
}

/// The state machine proper. Methods must only be called from the control
/// context; the runner below is the production driver.
pub struct Session {
    state: SessionState,
    accumulated_text: String,
    current_segment_text: String,

    engine: Arc<dyn RecognitionEngine>,
    audio: Box<dyn AudioSource>,
    watchdog: InactivityWatchdog,
    watchdog_tx: Sender<u64>,
    dispatcher: RewriteDispatcher,
    sink: Arc<dyn TextSink>,
    context_cache: PromptContextCache,
    config: SessionConfig,

    /// Generation of the active recognition pass; stale updates are dropped.
    generation: u64,
    pending_rewrite: Option<(u64, String)>,
    last_error: Option<String>,
}

impl Session {
    /// Builds a session plus the channels its runner drains.
    ///
    /// `engine_events` is the receiver paired with the sender the engine
    /// was constructed with.
    #[allow(clippy::type_complexity)]
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        audio: Box<dyn AudioSource>,
        rewriter: Arc<dyn Rewriter>,
        sink: Arc<dyn TextSink>,
        config: SessionConfig,
    ) -> (Self, Receiver<u64>, Receiver<RewriteOutcome>) {
        let (watchdog_tx, watchdog_rx) = unbounded();
        let (rewrite_tx, rewrite_rx) = unbounded();
        let dispatcher = RewriteDispatcher::new(rewriter, config.rewrite_timeout, rewrite_tx);

        let session = Self {
            state: SessionState::Idle,
            accumulated_text: String::new(),
            current_segment_text: String::new(),
            engine,
            audio,
            watchdog: InactivityWatchdog::new(),
            watchdog_tx,
            dispatcher,
            sink,
            context_cache: PromptContextCache::new(),
            config,
            generation: 0,
            pending_rewrite: None,
            last_error: None,
        };
        (session, watchdog_rx, rewrite_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            text: self.display_text(),
            last_error: self.last_error.clone(),
        }
    }

    fn display_text(&self) -> String {
        join_segments(&self.accumulated_text, &self.current_segment_text)
    }

    fn clear_text(&mut self) {
        self.accumulated_text.clear();
        self.current_segment_text.clear();
    }

    fn surface_error(&mut self, error: &SottoError) {
        eprintln!("sotto: {} ({})", error, error.cause_code());
        self.last_error = Some(format!("{} ({})", error, error.cause_code()));
    }

    /// Folds the in-flight segment into the committed text.
    fn fold_current_segment(&mut self) {
        let segment = std::mem::take(&mut self.current_segment_text);
        self.accumulated_text = join_segments(&self.accumulated_text, &segment);
    }

    fn arm_watchdog(&mut self) {
        if !self.engine.is_streaming() || self.config.silence_timeout.is_zero() {
            return;
        }
        let tx = self.watchdog_tx.clone();
        let generation = self.generation;
        self.watchdog.start(
            self.config.silence_timeout,
            Box::new(move || {
                let _ = tx.send(generation);
            }),
        );
    }

    /// Toggles between listening and stopped. No-op while a rewrite is
    /// outstanding.
    pub fn handle_toggle(&mut self) {
        match self.state {
            SessionState::Idle => self.begin_listening(),
            SessionState::Listening => self.finish_listening(),
            SessionState::Processing => {}
        }
    }

    fn begin_listening(&mut self) {
        self.clear_text();
        self.last_error = None;

        if self.engine.supports_prompt_context() {
            let recent = self.context_cache.recent_texts_newest_first();
            self.engine.set_prompt_context(recent);
        }

        let engine = Arc::clone(&self.engine);
        let on_frame: Arc<dyn Fn(AudioFrame) + Send + Sync> =
            Arc::new(move |frame| engine.feed_audio(&frame));
        if let Err(e) = self.audio.start(on_frame) {
            // Recognition is never started when capture fails.
            self.audio.stop();
            self.surface_error(&e);
            return;
        }

        self.generation = self.engine.start_recognition(&self.config.locale);
        self.arm_watchdog();
        self.state = SessionState::Listening;
    }

    fn finish_listening(&mut self) {
        self.watchdog.stop();

        if self.engine.is_streaming() {
            // Streaming already has the full text; the engine's final
            // event for this pass is redundant and gets ignored.
            self.fold_current_segment();
            let raw = std::mem::take(&mut self.accumulated_text);
            self.engine.stop_recognition();
            self.audio.stop();
            self.state = SessionState::Processing;
            self.process_raw_text(raw);
        } else {
            // Batch text arrives later as a user-initiated final event.
            self.engine.stop_recognition();
            self.audio.stop();
            self.state = SessionState::Processing;
        }
    }

    /// Aborts the current utterance without emitting anything.
    pub fn handle_cancel(&mut self) {
        if self.state != SessionState::Listening {
            return;
        }
        self.watchdog.stop();
        self.engine.cancel_recognition();
        self.audio.stop();
        self.clear_text();
        self.generation = 0;
        self.state = SessionState::Idle;
    }

    pub fn handle_recognition(&mut self, update: RecognitionUpdate) {
        if update.generation != self.generation {
            return;
        }
        match update.event {
            RecognitionEvent::Partial(text) => self.on_partial(text),
            RecognitionEvent::Final {
                text,
                user_initiated: false,
            } => self.on_engine_final(text),
            RecognitionEvent::Final {
                text,
                user_initiated: true,
            } => self.on_user_final(text),
            RecognitionEvent::Error(e) => self.on_recognition_error(e),
        }
    }

    fn on_partial(&mut self, text: String) {
        if self.state != SessionState::Listening {
            return;
        }

        // Segment reset: the engine silently restarted segmentation and the
        // new partial is much shorter than what it replaced. Commit the old
        // segment instead of losing it.
        let prev_len = self.current_segment_text.chars().count();
        let new_len = text.chars().count();
        if prev_len >= self.config.segment_reset_min_len
            && (new_len as f64) < (prev_len as f64) * self.config.segment_reset_ratio
        {
            self.fold_current_segment();
        }

        self.current_segment_text = text;
        self.watchdog.on_text_changed(&self.display_text());
    }

    /// Engine self-terminated at an internal utterance boundary. Keep
    /// accumulating and restart recognition with no visible gap.
    fn on_engine_final(&mut self, text: String) {
        if self.state != SessionState::Listening {
            return;
        }
        self.current_segment_text.clear();
        self.accumulated_text = join_segments(&self.accumulated_text, &text);

        self.generation = self.engine.start_recognition(&self.config.locale);
        self.arm_watchdog();
        self.watchdog.on_text_changed(&self.display_text());
    }

    /// The batch engine's one entry point into text processing. Guarded to
    /// the batch engine: streaming text was already processed synchronously
    /// when the user toggled.
    fn on_user_final(&mut self, text: String) {
        if self.state != SessionState::Processing || self.engine.is_streaming() {
            return;
        }
        self.process_raw_text(text);
    }

    fn on_recognition_error(&mut self, error: SottoError) {
        match self.state {
            SessionState::Idle => {}
            SessionState::Listening | SessionState::Processing => {
                self.watchdog.stop();
                self.audio.stop();
                self.clear_text();
                self.pending_rewrite = None;
                self.generation = 0;
                self.surface_error(&error);
                self.state = SessionState::Idle;
            }
        }
    }

    /// Finishes an utterance: empty text short-circuits, anything else goes
    /// through the rewrite step.
    fn process_raw_text(&mut self, raw: String) {
        let raw = raw.trim().to_string();
        if raw.is_empty() {
            self.clear_text();
            self.state = SessionState::Idle;
            return;
        }
        let ticket = self.dispatcher.dispatch(raw.clone());
        self.pending_rewrite = Some((ticket, raw));
    }

    pub fn handle_rewrite(&mut self, outcome: RewriteOutcome) {
        let Some((ticket, raw)) = self.pending_rewrite.take() else {
            return;
        };
        if outcome.ticket != ticket || self.state != SessionState::Processing {
            self.pending_rewrite = Some((ticket, raw));
            return;
        }

        let final_text = match outcome.result {
            Ok(text) => text,
            Err(e) => {
                // Non-fatal: the utterance completes with the raw text.
                self.surface_error(&e);
                raw
            }
        };

        self.sink.emit(&final_text);
        self.context_cache.push(&final_text);
        self.clear_text();
        self.state = SessionState::Idle;
    }

    /// Silence ran out. Completes the utterance exactly as a user stop
    /// would; with nothing recognized this falls through to `Idle`.
    pub fn handle_watchdog_timeout(&mut self, generation: u64) {
        if self.state != SessionState::Listening || generation != self.generation {
            return;
        }
        self.finish_listening();
    }

    /// Tears down whatever the current state holds.
    pub fn shutdown(&mut self) {
        self.watchdog.stop();
        if self.state == SessionState::Listening {
            self.engine.cancel_recognition();
        }
        self.audio.stop();
        self.clear_text();
        self.pending_rewrite = None;
        self.state = SessionState::Idle;
    }
}

fn join_segments(left: &str, right: &str) -> String {
    let right = right.trim();
    if right.is_empty() {
        return left.to_string();
    }
    if left.is_empty() {
        right.to_string()
    } else {
        format!("{} {}", left, right)
    }
}

/// Cloneable control handle for the runner.
#[derive(Clone)]
pub struct SessionHandle {
    commands: Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn toggle(&self) -> bool {
        self.commands.send(SessionCommand::Toggle).is_ok()
    }

    pub fn cancel(&self) -> bool {
        self.commands.send(SessionCommand::Cancel).is_ok()
    }

    pub fn status(&self) -> Option<SessionStatus> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands.send(SessionCommand::Status(reply_tx)).ok()?;
        reply_rx.recv_timeout(Duration::from_secs(5)).ok()
    }

    pub fn shutdown(&self) -> bool {
        self.commands.send(SessionCommand::Shutdown).is_ok()
    }
}

/// The control context: one thread, one select loop, all state.
pub struct SessionRunner {
    session: Session,
    commands: Receiver<SessionCommand>,
    recognition: Receiver<RecognitionUpdate>,
    watchdog: Receiver<u64>,
    rewrites: Receiver<RewriteOutcome>,
}

impl SessionRunner {
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        recognition: Receiver<RecognitionUpdate>,
        audio: Box<dyn AudioSource>,
        rewriter: Arc<dyn Rewriter>,
        sink: Arc<dyn TextSink>,
        config: SessionConfig,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = unbounded();
        let (session, watchdog_rx, rewrite_rx) =
            Session::new(engine, audio, rewriter, sink, config);
        let runner = Self {
            session,
            commands: command_rx,
            recognition,
            watchdog: watchdog_rx,
            rewrites: rewrite_rx,
        };
        let handle = SessionHandle {
            commands: command_tx,
        };
        (runner, handle)
    }

    /// Runs until shutdown or until every command handle is dropped.
    pub fn run(mut self) {
        loop {
            select! {
                recv(self.commands) -> command => match command {
                    Ok(SessionCommand::Toggle) => self.session.handle_toggle(),
                    Ok(SessionCommand::Cancel) => self.session.handle_cancel(),
                    Ok(SessionCommand::Status(reply)) => {
                        let _ = reply.send(self.session.status());
                    }
                    Ok(SessionCommand::Shutdown) | Err(_) => {
                        self.session.shutdown();
                        return;
                    }
                },
                recv(self.recognition) -> update => {
                    if let Ok(update) = update {
                        self.session.handle_recognition(update);
                    }
                },
                recv(self.watchdog) -> generation => {
                    if let Ok(generation) = generation {
                        self.session.handle_watchdog_timeout(generation);
                    }
                },
                recv(self.rewrites) -> outcome => {
                    if let Ok(outcome) = outcome {
                        self.session.handle_rewrite(outcome);
                    }
                },
            }
        }
    }

    /// Spawns the loop on its own thread.
    pub fn spawn(self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("sotto-session".to_string())
            .spawn(move || self.run())
            .unwrap_or_else(|e| panic!("failed to spawn session thread: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockAudioSource;
    use crate::session::rewrite::MockRewriter;
    use crate::session::sink::CollectorSink;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[test]
    fn default_config_mirrors_crate_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.locale, defaults::DEFAULT_LOCALE);
        assert_eq!(config.silence_timeout, defaults::SILENCE_TIMEOUT);
        assert_eq!(config.segment_reset_min_len, defaults::SEGMENT_RESET_MIN_LEN);
        assert!((config.segment_reset_ratio - f64::from(defaults::SEGMENT_RESET_RATIO)).abs() < 1e-9);
    }

    /// Hand-driven engine: tests post events straight into the session.
    struct ScriptedEngine {
        streaming: bool,
        prompt_context: bool,
        generation: AtomicU64,
        starts: AtomicUsize,
        stops: AtomicUsize,
        cancels: AtomicUsize,
        prompts: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedEngine {
        fn streaming() -> Arc<Self> {
            Arc::new(Self {
                streaming: true,
                prompt_context: false,
                generation: AtomicU64::new(0),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn batch() -> Arc<Self> {
            Arc::new(Self {
                streaming: false,
                prompt_context: true,
                generation: AtomicU64::new(0),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn current_generation(&self) -> u64 {
            self.generation.load(Ordering::SeqCst)
        }
    }

    impl RecognitionEngine for ScriptedEngine {
        fn is_streaming(&self) -> bool {
            self.streaming
        }

        fn supports_prompt_context(&self) -> bool {
            self.prompt_context
        }

        fn set_prompt_context(&self, texts: Vec<String>) {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(texts);
            }
        }

        fn start_recognition(&self, _locale: &str) -> u64 {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn feed_audio(&self, _frame: &AudioFrame) {}

        fn stop_recognition(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel_recognition(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        session: Session,
        engine: Arc<ScriptedEngine>,
        rewrite_rx: Receiver<RewriteOutcome>,
        watchdog_rx: Receiver<u64>,
        emitted: Arc<Mutex<Vec<String>>>,
        rewrite_calls: Arc<Mutex<Vec<String>>>,
        audio: crate::audio::MockAudioHandle,
    }

    fn fixture(engine: Arc<ScriptedEngine>, rewriter: MockRewriter) -> Fixture {
        let audio = MockAudioSource::new();
        let audio_handle = audio.handle();
        let sink = CollectorSink::new();
        let emitted = sink.emitted_handle();
        let rewrite_calls = rewriter.calls_handle();
        let config = SessionConfig {
            silence_timeout: Duration::ZERO,
            rewrite_timeout: Duration::from_secs(5),
            ..SessionConfig::default()
        };
        let (session, watchdog_rx, rewrite_rx) = Session::new(
            Arc::clone(&engine) as Arc<dyn RecognitionEngine>,
            Box::new(audio),
            Arc::new(rewriter),
            Arc::new(sink),
            config,
        );
        Fixture {
            session,
            engine,
            rewrite_rx,
            watchdog_rx,
            emitted,
            rewrite_calls,
            audio: audio_handle,
        }
    }

    fn partial(generation: u64, text: &str) -> RecognitionUpdate {
        RecognitionUpdate {
            generation,
            event: RecognitionEvent::Partial(text.to_string()),
        }
    }

    fn final_event(generation: u64, text: &str, user_initiated: bool) -> RecognitionUpdate {
        RecognitionUpdate {
            generation,
            event: RecognitionEvent::Final {
                text: text.to_string(),
                user_initiated,
            },
        }
    }

    /// Drives one pending rewrite outcome into the session.
    fn pump_rewrite(f: &mut Fixture) {
        let outcome = f
            .rewrite_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("expected a rewrite outcome");
        f.session.handle_rewrite(outcome);
    }

    #[test]
    fn toggle_starts_and_finishes_a_streaming_utterance() {
        let mut f = fixture(ScriptedEngine::streaming(), MockRewriter::new());

        f.session.handle_toggle();
        assert_eq!(f.session.state(), SessionState::Listening);
        assert!(f.audio.is_started());
        assert_eq!(f.engine.starts.load(Ordering::SeqCst), 1);

        let generation = f.engine.current_generation();
        f.session.handle_recognition(partial(generation, "hello world"));
        assert_eq!(f.session.status().text, "hello world");

        f.session.handle_toggle();
        assert_eq!(f.engine.stops.load(Ordering::SeqCst), 1);
        assert!(!f.audio.is_started());

        pump_rewrite(&mut f);
        assert_eq!(f.session.state(), SessionState::Idle);
        assert_eq!(*f.emitted.lock().unwrap(), vec!["hello world"]);
        assert_eq!(*f.rewrite_calls.lock().unwrap(), vec!["hello world"]);
    }

    #[test]
    fn late_user_final_never_double_processes_streaming_text() {
        let mut f = fixture(ScriptedEngine::streaming(), MockRewriter::new());

        f.session.handle_toggle();
        let generation = f.engine.current_generation();
        f.session.handle_recognition(partial(generation, "only once"));
        f.session.handle_toggle();

        // The engine's redundant final for the stopped pass arrives late.
        f.session
            .handle_recognition(final_event(generation, "only once", true));

        pump_rewrite(&mut f);
        assert_eq!(*f.rewrite_calls.lock().unwrap(), vec!["only once"]);
        assert!(
            f.rewrite_rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "a second rewrite was dispatched"
        );
        assert_eq!(*f.emitted.lock().unwrap(), vec!["only once"]);
    }

    #[test]
    fn segment_reset_folds_previous_segment() {
        let mut f = fixture(ScriptedEngine::streaming(), MockRewriter::new());

        f.session.handle_toggle();
        let generation = f.engine.current_generation();
        f.session
            .handle_recognition(partial(generation, "the first sentence"));
        // Much shorter partial: engine restarted segmentation.
        f.session.handle_recognition(partial(generation, "and"));
        assert_eq!(f.session.status().text, "the first sentence and");

        f.session.handle_toggle();
        pump_rewrite(&mut f);
        assert_eq!(*f.emitted.lock().unwrap(), vec!["the first sentence and"]);
    }

    #[test]
    fn short_previous_segment_is_replaced_not_folded() {
        let mut f = fixture(ScriptedEngine::streaming(), MockRewriter::new());

        f.session.handle_toggle();
        let generation = f.engine.current_generation();
        f.session.handle_recognition(partial(generation, "hey"));
        f.session.handle_recognition(partial(generation, "a"));
        assert_eq!(f.session.status().text, "a");
    }

    #[test]
    fn engine_self_termination_restarts_seamlessly() {
        let mut f = fixture(ScriptedEngine::streaming(), MockRewriter::new());

        f.session.handle_toggle();
        let gen1 = f.engine.current_generation();
        f.session.handle_recognition(partial(gen1, "first part"));
        f.session
            .handle_recognition(final_event(gen1, "first part", false));

        assert_eq!(f.session.state(), SessionState::Listening);
        assert_eq!(f.engine.starts.load(Ordering::SeqCst), 2);

        let gen2 = f.engine.current_generation();
        assert_ne!(gen1, gen2);
        f.session.handle_recognition(partial(gen2, "second part"));
        assert_eq!(f.session.status().text, "first part second part");

        f.session.handle_toggle();
        pump_rewrite(&mut f);
        assert_eq!(*f.emitted.lock().unwrap(), vec!["first part second part"]);
    }

    #[test]
    fn stale_generation_updates_are_dropped() {
        let mut f = fixture(ScriptedEngine::streaming(), MockRewriter::new());

        f.session.handle_toggle();
        let generation = f.engine.current_generation();
        f.session
            .handle_recognition(partial(generation + 7, "from the future"));
        f.session.handle_recognition(partial(generation.wrapping_sub(1), "from the past"));
        assert_eq!(f.session.status().text, "");
    }

    #[test]
    fn batch_final_drives_exactly_one_rewrite() {
        let mut f = fixture(ScriptedEngine::batch(), MockRewriter::new());

        f.session.handle_toggle();
        let generation = f.engine.current_generation();
        f.session.handle_toggle();
        assert_eq!(f.session.state(), SessionState::Processing);

        f.session
            .handle_recognition(final_event(generation, "batch result", true));
        pump_rewrite(&mut f);

        assert_eq!(f.session.state(), SessionState::Idle);
        assert_eq!(*f.rewrite_calls.lock().unwrap(), vec!["batch result"]);
        assert_eq!(*f.emitted.lock().unwrap(), vec!["batch result"]);
    }

    #[test]
    fn empty_batch_final_short_circuits_to_idle() {
        let mut f = fixture(ScriptedEngine::batch(), MockRewriter::new());

        f.session.handle_toggle();
        let generation = f.engine.current_generation();
        f.session.handle_toggle();
        f.session.handle_recognition(final_event(generation, "   ", true));

        assert_eq!(f.session.state(), SessionState::Idle);
        assert!(f.rewrite_calls.lock().unwrap().is_empty());
        assert!(f.emitted.lock().unwrap().is_empty());
    }

    #[test]
    fn cancel_returns_to_idle_with_zero_rewrites() {
        for engine in [ScriptedEngine::streaming(), ScriptedEngine::batch()] {
            let mut f = fixture(engine, MockRewriter::new());

            f.session.handle_toggle();
            let generation = f.engine.current_generation();
            f.session.handle_recognition(partial(generation, "discard me"));
            f.session.handle_cancel();

            assert_eq!(f.session.state(), SessionState::Idle);
            assert_eq!(f.session.status().text, "");
            assert_eq!(f.engine.cancels.load(Ordering::SeqCst), 1);
            assert!(!f.audio.is_started());
            assert!(f.rewrite_calls.lock().unwrap().is_empty());
        }
    }

    #[test]
    fn toggle_while_processing_is_ignored() {
        let mut f = fixture(ScriptedEngine::batch(), MockRewriter::new());

        f.session.handle_toggle();
        f.session.handle_toggle();
        assert_eq!(f.session.state(), SessionState::Processing);

        f.session.handle_toggle();
        assert_eq!(f.session.state(), SessionState::Processing);
        assert_eq!(f.engine.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rewrite_failure_falls_back_to_raw_text() {
        let mut f = fixture(
            ScriptedEngine::streaming(),
            MockRewriter::new().with_error(SottoError::RewriteFailed {
                message: "llm offline".to_string(),
            }),
        );

        f.session.handle_toggle();
        let generation = f.engine.current_generation();
        f.session.handle_recognition(partial(generation, "keep me raw"));
        f.session.handle_toggle();
        pump_rewrite(&mut f);

        assert_eq!(f.session.state(), SessionState::Idle);
        assert_eq!(*f.emitted.lock().unwrap(), vec!["keep me raw"]);
        let status = f.session.status();
        assert!(status.last_error.unwrap().contains("rewrite.failed"));
    }

    #[test]
    fn recognition_error_discards_text_and_returns_to_idle() {
        let mut f = fixture(ScriptedEngine::streaming(), MockRewriter::new());

        f.session.handle_toggle();
        let generation = f.engine.current_generation();
        f.session.handle_recognition(partial(generation, "half an utter"));
        f.session.handle_recognition(RecognitionUpdate {
            generation,
            event: RecognitionEvent::Error(SottoError::RecognitionFailed {
                message: "decoder blew up".to_string(),
            }),
        });

        assert_eq!(f.session.state(), SessionState::Idle);
        assert_eq!(f.session.status().text, "");
        assert!(!f.audio.is_started());
        assert!(f.emitted.lock().unwrap().is_empty());
    }

    #[test]
    fn audio_start_failure_never_starts_recognition() {
        let audio = MockAudioSource::new().with_start_failure();
        let engine = ScriptedEngine::streaming();
        let sink = CollectorSink::new();
        let (mut session, _wd, _rw) = Session::new(
            Arc::clone(&engine) as Arc<dyn RecognitionEngine>,
            Box::new(audio),
            Arc::new(MockRewriter::new()),
            Arc::new(sink),
            SessionConfig::default(),
        );

        session.handle_toggle();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 0);
        assert!(session.status().last_error.is_some());
    }

    #[test]
    fn watchdog_timeout_completes_the_utterance() {
        let engine = ScriptedEngine::streaming();
        let audio = MockAudioSource::new();
        let sink = CollectorSink::new();
        let emitted = sink.emitted_handle();
        let config = SessionConfig {
            silence_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        };
        let (mut session, watchdog_rx, rewrite_rx) = Session::new(
            Arc::clone(&engine) as Arc<dyn RecognitionEngine>,
            Box::new(audio),
            Arc::new(MockRewriter::new()),
            Arc::new(sink),
            config,
        );

        session.handle_toggle();
        let generation = engine.current_generation();
        session.handle_recognition(partial(generation, "trailing off"));

        let fired = watchdog_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        session.handle_watchdog_timeout(fired);
        assert_eq!(session.state(), SessionState::Processing);

        let outcome = rewrite_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        session.handle_rewrite(outcome);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(*emitted.lock().unwrap(), vec!["trailing off"]);
    }

    #[test]
    fn stale_watchdog_timeout_is_ignored() {
        let mut f = fixture(ScriptedEngine::streaming(), MockRewriter::new());

        f.session.handle_toggle();
        f.session.handle_watchdog_timeout(999);
        assert_eq!(f.session.state(), SessionState::Listening);
        // Disarmed configuration sends nothing on its own.
        assert!(f.watchdog_rx.try_recv().is_err());
    }

    #[test]
    fn accepted_text_reaches_prompt_context_on_next_start() {
        let mut f = fixture(ScriptedEngine::batch(), MockRewriter::new());

        f.session.handle_toggle();
        let generation = f.engine.current_generation();
        f.session.handle_toggle();
        f.session
            .handle_recognition(final_event(generation, "first utterance", true));
        pump_rewrite(&mut f);

        f.session.handle_toggle();
        let prompts = f.engine.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].is_empty());
        assert_eq!(prompts[1], vec!["first utterance".to_string()]);
    }
}
