//! Whisper-backed recognizers.
//!
//! Provides the batch recognizer and an incremental decode backend for the
//! streaming engine, both on whisper-rs. Requires the `whisper` feature and
//! cmake at build time:
//!
//! ```bash
//! cargo build --features whisper
//! ```

use crate::defaults;
use crate::engine::batch::BatchRecognizer;
use crate::engine::streaming::StreamingBackend;
use crate::error::{Result, SottoError};
use crate::text::SegmentStats;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Configuration for the Whisper recognizers.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to the ggml model file.
    pub model_path: PathBuf,
    /// Number of inference threads (None = auto-detect).
    pub threads: Option<usize>,
    /// Whether the model variant decodes stably when primed with prompt
    /// context. Set from the model catalog.
    pub context_stable: bool,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-base.bin"),
            threads: None,
            context_stable: false,
        }
    }
}

/// Whisper recognizer for the batch engine.
///
/// The model context loads lazily on `ensure_loaded` so a session can start
/// listening while the load is still under way.
pub struct WhisperRecognizer {
    config: WhisperConfig,
    context: Mutex<Option<WhisperContext>>,
}

impl std::fmt::Debug for WhisperRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperRecognizer")
            .field("config", &self.config)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

impl WhisperRecognizer {
    /// Creates a recognizer. The model file must exist; loading it is
    /// deferred to `ensure_loaded`.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(SottoError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        Ok(Self {
            config,
            context: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }

    fn load_context(&self) -> Result<WhisperContext> {
        let mut context_params = WhisperContextParameters::default();
        // Fused attention kernels avoid the standalone softmax CUDA kernel,
        // which crashes on Blackwell GPUs (sm_120) with ggml <= 1.7.6.
        context_params.flash_attn(true);

        let path = self
            .config
            .model_path
            .to_str()
            .ok_or_else(|| SottoError::ModelLoadFailed {
                message: "Invalid UTF-8 in model path".to_string(),
            })?;

        WhisperContext::new_with_params(path, context_params).map_err(|e| {
            SottoError::ModelLoadFailed {
                message: format!("Failed to load Whisper model: {}", e),
            }
        })
    }

    fn with_context<R>(&self, f: impl FnOnce(&WhisperContext) -> Result<R>) -> Result<R> {
        let guard = self
            .context
            .lock()
            .map_err(|e| SottoError::RecognitionFailed {
                message: format!("Failed to acquire context lock: {}", e),
            })?;
        match guard.as_ref() {
            Some(context) => f(context),
            None => Err(SottoError::RecognizerUnavailable {
                message: "Whisper model not loaded".to_string(),
            }),
        }
    }

    fn params<'a>(&self, locale: &'a str, prompt: Option<&'a str>) -> FullParams<'a, 'a> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        if locale == defaults::DEFAULT_LOCALE {
            params.set_language(None);
        } else {
            params.set_language(Some(locale));
        }
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }
        if let Some(prompt) = prompt {
            params.set_initial_prompt(prompt);
        }

        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        params
    }

    /// One decode pass returning per-segment text and confidence.
    fn run_full(
        &self,
        samples: &[f32],
        locale: &str,
        prompt: Option<&str>,
    ) -> Result<Vec<SegmentStats>> {
        self.with_context(|context| {
            let mut state = context
                .create_state()
                .map_err(|e| SottoError::RecognitionFailed {
                    message: format!("Failed to create Whisper state: {}", e),
                })?;

            let params = self.params(locale, prompt);
            state
                .full(params, samples)
                .map_err(|e| SottoError::RecognitionFailed {
                    message: format!("Whisper inference failed: {}", e),
                })?;

            let mut segments = Vec::new();
            for segment in state.as_iter() {
                // Token-level log-probabilities are not exposed through this
                // decode path; 0.0 is the confident neutral, so the suffix
                // filter falls back to no-speech probability alone.
                segments.push(SegmentStats::new(
                    segment.to_string(),
                    segment.no_speech_probability(),
                    0.0,
                ));
            }
            Ok(segments)
        })
    }
}

impl BatchRecognizer for WhisperRecognizer {
    fn ensure_loaded(&self) -> Result<()> {
        let mut guard = self
            .context
            .lock()
            .map_err(|e| SottoError::ModelLoadFailed {
                message: format!("Failed to acquire context lock: {}", e),
            })?;
        if guard.is_none() {
            *guard = Some(self.load_context()?);
        }
        Ok(())
    }

    fn transcribe(
        &self,
        samples: &[f32],
        locale: &str,
        prompt: Option<&str>,
        cancelled: &AtomicBool,
    ) -> Result<Vec<SegmentStats>> {
        if cancelled.load(Ordering::SeqCst) {
            return Err(SottoError::RecognitionCancelled);
        }
        self.run_full(samples, locale, prompt)
    }

    fn tokenize(&self, text: &str) -> Result<Vec<i32>> {
        self.with_context(|context| {
            context
                .tokenize(text, defaults::CONTEXT_TOKEN_BUDGET * 4)
                .map_err(|e| SottoError::RecognitionFailed {
                    message: format!("Tokenization failed: {}", e),
                })
        })
    }

    fn is_special_token(&self, token: i32) -> bool {
        // Whisper vocabularies place all special tokens at and above EOT.
        self.with_context(|context| Ok(token >= context.token_eot()))
            .unwrap_or(false)
    }

    fn context_stable(&self) -> bool {
        self.config.context_stable
    }
}

/// Incremental decode backend for the streaming engine.
///
/// Re-decodes the whole segment buffer each call with the shared model
/// context. Good enough for dictation-length segments; long-form audio
/// belongs to the batch engine.
pub struct WhisperStreamingBackend {
    recognizer: std::sync::Arc<WhisperRecognizer>,
    locale: String,
}

impl WhisperStreamingBackend {
    pub fn new(recognizer: std::sync::Arc<WhisperRecognizer>) -> Self {
        Self {
            recognizer,
            locale: defaults::DEFAULT_LOCALE.to_string(),
        }
    }
}

impl StreamingBackend for WhisperStreamingBackend {
    fn begin_segment(&mut self, locale: &str) -> Result<()> {
        self.locale = locale.to_string();
        self.recognizer.ensure_loaded()
    }

    fn decode(&mut self, samples: &[f32]) -> Result<String> {
        // Sub-second buffers produce pure noise from Whisper; report
        // silence instead of decoding them.
        if samples.len() < defaults::SAMPLE_RATE as usize / 2 {
            return Ok(String::new());
        }
        let segments = self.recognizer.run_full(samples, &self.locale, None)?;
        let joined = segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(joined)
    }
}
