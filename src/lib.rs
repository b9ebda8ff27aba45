//! sotto - push-to-talk dictation for the terminal
//!
//! Offline speech recognition with generation-tagged session orchestration
//! and optional rewrite of the raw transcript before it is emitted.

// Enforce error handling discipline in non-test code
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod models;
pub mod session;
pub mod text;

#[cfg(feature = "cli")]
pub mod cli;

// Composition root - wires config, engine, audio, and IPC together
#[cfg(feature = "cli")]
pub mod app;

// Core traits (audio source → recognition engine → rewrite → sink)
pub use audio::{AudioFrame, AudioSource};
pub use engine::{RecognitionEngine, RecognitionEvent, RecognitionUpdate};
pub use session::{Rewriter, TextSink};

// Session orchestration
pub use session::{SessionConfig, SessionHandle, SessionRunner, SessionState, SessionStatus};

// Error handling
pub use error::{Result, SottoError};

// Config
pub use config::{Config, EngineKind};

/// Build version string with optional git commit hash.
///
/// Returns `"0.3.1+abc1234"` when git hash is available, `"0.3.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
