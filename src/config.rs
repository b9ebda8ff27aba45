//! TOML configuration with environment overrides.

use crate::defaults;
use crate::error::{Result, SottoError};
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub recognition: RecognitionConfig,
    pub session: SessionSettings,
    pub rewrite: RewriteConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture device name; `None` picks the best available device.
    pub device: Option<String>,
}

/// Recognition engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub engine: EngineKind,
    /// Catalog variant name or a path to a ggml model file.
    pub model: String,
    /// BCP-47 language tag, or "auto" for detection.
    pub locale: String,
    /// Inference threads; zero means all available cores.
    pub threads: usize,
}

/// Session behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    /// Silence watchdog deadline in milliseconds; zero disables it.
    pub silence_timeout_ms: u64,
    pub segment_reset_min_len: usize,
    pub segment_reset_ratio: f64,
}

/// Rewrite collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RewriteConfig {
    /// Shell command receiving raw text on stdin; `None` passes text through.
    pub command: Option<String>,
    /// Per-call bound in milliseconds; zero means unbounded.
    pub timeout_ms: u64,
}

/// Recognition engine selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Streaming,
    Batch,
}

impl std::str::FromStr for EngineKind {
    type Err = SottoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "streaming" => Ok(EngineKind::Streaming),
            "batch" => Ok(EngineKind::Batch),
            other => Err(SottoError::ConfigInvalidValue {
                key: "recognition.engine".to_string(),
                message: format!("expected 'streaming' or 'batch', got '{}'", other),
            }),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { device: None }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Batch,
            model: defaults::DEFAULT_MODEL.to_string(),
            locale: defaults::DEFAULT_LOCALE.to_string(),
            threads: 0,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            silence_timeout_ms: defaults::SILENCE_TIMEOUT.as_millis() as u64,
            segment_reset_min_len: defaults::SEGMENT_RESET_MIN_LEN,
            segment_reset_ratio: defaults::SEGMENT_RESET_RATIO as f64,
        }
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_ms: defaults::REWRITE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values; invalid TOML is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SottoError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                SottoError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if the file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML or invalid
    /// values are still errors.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(SottoError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SOTTO_ENGINE → recognition.engine
    /// - SOTTO_MODEL → recognition.model
    /// - SOTTO_LOCALE → recognition.locale
    /// - SOTTO_AUDIO_DEVICE → audio.device
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(engine) = std::env::var("SOTTO_ENGINE")
            && !engine.is_empty()
        {
            self.recognition.engine = engine.parse()?;
        }

        if let Ok(model) = std::env::var("SOTTO_MODEL")
            && !model.is_empty()
        {
            self.recognition.model = model;
        }

        if let Ok(locale) = std::env::var("SOTTO_LOCALE")
            && !locale.is_empty()
        {
            self.recognition.locale = locale;
        }

        if let Ok(device) = std::env::var("SOTTO_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.recognition.model.is_empty() {
            return Err(SottoError::ConfigInvalidValue {
                key: "recognition.model".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        let ratio = self.session.segment_reset_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(SottoError::ConfigInvalidValue {
                key: "session.segment_reset_ratio".to_string(),
                message: format!("must be between 0 and 1 exclusive, got {}", ratio),
            });
        }
        Ok(())
    }

    /// Session tunables derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            locale: self.recognition.locale.clone(),
            silence_timeout: Duration::from_millis(self.session.silence_timeout_ms),
            rewrite_timeout: Duration::from_millis(self.rewrite.timeout_ms),
            segment_reset_min_len: self.session.segment_reset_min_len,
            segment_reset_ratio: self.session.segment_reset_ratio,
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/sotto/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("sotto")
            .join("config.toml")
    }
}
