//! Default configuration constants for sotto.
//!
//! Shared constants used across configuration types and the session core,
//! kept in one place so the tunables stay visible and consistent.

use std::time::Duration;

/// Audio sample rate expected by the recognizers, in Hz.
///
/// 16kHz mono is the standard input format for speech models and keeps the
/// resampling path on the capture thread cheap.
pub const SAMPLE_RATE: u32 = 16_000;

/// Default Whisper model variant for the batch engine.
///
/// "base" (multilingual) supports auto-detection of any language.
/// Use "base.en" explicitly for English-only dictation.
pub const DEFAULT_MODEL: &str = "base";

/// Default locale for recognition.
///
/// "auto" lets the recognizer detect the spoken language.
pub const DEFAULT_LOCALE: &str = "auto";

/// Default silence timeout before a listening session is auto-cancelled.
///
/// Only the streaming engine observes activity (through partial results),
/// so only the streaming engine arms the watchdog. Zero disables it.
pub const SILENCE_TIMEOUT: Duration = Duration::from_secs(8);

/// Default bound on a single rewrite call.
///
/// A rewrite collaborator that never completes would otherwise strand the
/// session in `Processing`. On expiry the raw text is emitted unchanged.
pub const REWRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum length of the previous partial before a shrink counts as a
/// segment reset. Shorter partials shrink naturally while the recognizer
/// revises its hypothesis.
pub const SEGMENT_RESET_MIN_LEN: usize = 4;

/// A new partial shorter than this fraction of the previous one is treated
/// as an implicit segment boundary. Hand-tuned; override via `SessionConfig`
/// if a recognizer revises more aggressively.
pub const SEGMENT_RESET_RATIO: f32 = 0.5;

/// Recency window for the prompt-context cache.
///
/// Accepted utterances older than this are no longer useful as decoder
/// context and are purged lazily on the next read.
pub const CONTEXT_WINDOW: Duration = Duration::from_secs(120);

/// Token budget for prompt context fed to the batch recognizer.
///
/// Half the decoder's 224-token context window minus one, matching the
/// decoder's own truncation arithmetic for prompt text.
pub const CONTEXT_TOKEN_BUDGET: usize = 111;

/// Segments with a no-speech probability above this are discarded outright.
pub const NO_SPEECH_HARD_THRESHOLD: f32 = 0.6;

/// No-speech probability above which a suspicious last segment is discarded.
pub const NO_SPEECH_SOFT_THRESHOLD: f32 = 0.3;

/// Mean token log-probability below which a suspicious last segment is
/// discarded.
pub const AVG_LOGPROB_SUSPECT_THRESHOLD: f32 = -0.7;

/// How often the incremental streaming backend re-decodes buffered audio.
pub const STREAMING_DECODE_INTERVAL: Duration = Duration::from_millis(700);

/// Sustained silence after which the streaming backend self-terminates the
/// current segment and emits a non-user-initiated final.
pub const STREAMING_SEGMENT_SILENCE: Duration = Duration::from_millis(1800);

/// RMS level below which a streaming frame counts as silence.
pub const STREAMING_SILENCE_RMS: f32 = 0.01;

/// Report the GPU backend compiled into this build.
///
/// Only one GPU backend can be active at a time; if none is enabled,
/// returns "CPU".
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else if cfg!(feature = "hipblas") {
        "HipBLAS (AMD)"
    } else if cfg!(feature = "openblas") {
        "OpenBLAS"
    } else {
        "CPU"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_budget_matches_decoder_arithmetic() {
        // 224-token context window: half minus one.
        assert_eq!(CONTEXT_TOKEN_BUDGET, 224 / 2 - 1);
    }

    #[test]
    fn reset_ratio_is_a_fraction() {
        assert!(SEGMENT_RESET_RATIO > 0.0 && SEGMENT_RESET_RATIO < 1.0);
    }

    #[test]
    fn soft_threshold_below_hard_threshold() {
        assert!(NO_SPEECH_SOFT_THRESHOLD < NO_SPEECH_HARD_THRESHOLD);
    }

    #[test]
    fn gpu_backend_returns_nonempty() {
        assert!(!gpu_backend().is_empty());
    }
}
