//! Error types for sotto.
//!
//! Every variant carries a stable cause code alongside the human message so
//! tests and IPC clients can assert on the cause rather than on phrasing.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SottoError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Recognition errors
    #[error("Recognition model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Recognition model failed to load: {message}")]
    ModelLoadFailed { message: String },

    #[error("Recognizer unavailable: {message}")]
    RecognizerUnavailable { message: String },

    #[error("Recognition failed: {message}")]
    RecognitionFailed { message: String },

    #[error("Recognition cancelled")]
    RecognitionCancelled,

    // Rewrite errors (non-fatal: session falls back to raw text)
    #[error("Rewrite failed: {message}")]
    RewriteFailed { message: String },

    #[error("Rewrite timed out after {seconds}s")]
    RewriteTimedOut { seconds: u64 },

    // Model download errors
    #[error("Unknown model variant: {name}")]
    UnknownModel { name: String },

    #[error("Model download failed: {message}")]
    DownloadFailed { message: String },

    #[error("Model checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl SottoError {
    /// Stable machine-inspectable cause identifier.
    ///
    /// Codes never change once shipped; the display message may.
    pub fn cause_code(&self) -> &'static str {
        match self {
            SottoError::ConfigFileNotFound { .. } => "config.not_found",
            SottoError::ConfigInvalidValue { .. } => "config.invalid_value",
            SottoError::ConfigParse(_) => "config.parse",
            SottoError::AudioDeviceNotFound { .. } => "audio.device_not_found",
            SottoError::AudioCapture { .. } => "audio.capture",
            SottoError::ModelNotFound { .. } => "recognition.model_not_found",
            SottoError::ModelLoadFailed { .. } => "recognition.model_load",
            SottoError::RecognizerUnavailable { .. } => "recognition.unavailable",
            SottoError::RecognitionFailed { .. } => "recognition.failed",
            SottoError::RecognitionCancelled => "recognition.cancelled",
            SottoError::RewriteFailed { .. } => "rewrite.failed",
            SottoError::RewriteTimedOut { .. } => "rewrite.timeout",
            SottoError::UnknownModel { .. } => "model.unknown",
            SottoError::DownloadFailed { .. } => "model.download",
            SottoError::ChecksumMismatch { .. } => "model.checksum",
            SottoError::IpcSocket { .. } => "ipc.socket",
            SottoError::IpcProtocol { .. } => "ipc.protocol",
            SottoError::IpcConnection { .. } => "ipc.connection",
            SottoError::Io(_) => "io",
            SottoError::Other(_) => "other",
        }
    }

    /// True for failures the session survives by falling back to raw text.
    pub fn is_rewrite_failure(&self) -> bool {
        matches!(
            self,
            SottoError::RewriteFailed { .. } | SottoError::RewriteTimedOut { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SottoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn config_invalid_value_display() {
        let error = SottoError::ConfigInvalidValue {
            key: "silence_timeout".to_string(),
            message: "must not be negative".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for silence_timeout: must not be negative"
        );
    }

    #[test]
    fn audio_device_not_found_display() {
        let error = SottoError::AudioDeviceNotFound {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: default");
    }

    #[test]
    fn model_not_found_display() {
        let error = SottoError::ModelNotFound {
            path: "/models/ggml-base.bin".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Recognition model not found at /models/ggml-base.bin"
        );
    }

    #[test]
    fn rewrite_timeout_display() {
        let error = SottoError::RewriteTimedOut { seconds: 30 };
        assert_eq!(error.to_string(), "Rewrite timed out after 30s");
    }

    #[test]
    fn cause_codes_are_stable_and_distinct() {
        let errors = [
            SottoError::AudioCapture {
                message: "x".into(),
            },
            SottoError::RecognizerUnavailable {
                message: "x".into(),
            },
            SottoError::RecognitionFailed {
                message: "x".into(),
            },
            SottoError::RewriteFailed {
                message: "x".into(),
            },
            SottoError::RecognitionCancelled,
        ];
        let codes: Vec<_> = errors.iter().map(|e| e.cause_code()).collect();
        assert_eq!(
            codes,
            vec![
                "audio.capture",
                "recognition.unavailable",
                "recognition.failed",
                "rewrite.failed",
                "recognition.cancelled",
            ]
        );
    }

    #[test]
    fn rewrite_failures_are_flagged() {
        assert!(
            SottoError::RewriteFailed {
                message: "x".into()
            }
            .is_rewrite_failure()
        );
        assert!(SottoError::RewriteTimedOut { seconds: 1 }.is_rewrite_failure());
        assert!(
            !SottoError::RecognitionFailed {
                message: "x".into()
            }
            .is_rewrite_failure()
        );
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: SottoError = io_error.into();
        assert!(error.to_string().contains("file not found"));
        assert_eq!(error.cause_code(), "io");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: SottoError = toml_err.into();
        assert_eq!(error.cause_code(), "config.parse");
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SottoError>();
        assert_sync::<SottoError>();
    }
}
