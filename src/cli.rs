//! Command-line interface for sotto
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Push-to-talk dictation for the terminal
#[derive(Parser, Debug)]
#[command(name = "sotto", version, about = "Push-to-talk dictation for the terminal")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Recognition engine (streaming or batch)
    #[arg(long, value_name = "ENGINE")]
    pub engine: Option<String>,

    /// Whisper model (default: base, multilingual). Use base.en for English-only
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Language code for recognition (default: auto-detect). Examples: auto, en, de, es
    #[arg(long, value_name = "LANG")]
    pub locale: Option<String>,

    /// Audio input device name (see `sotto devices`)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Transcribe a WAV file instead of capturing from a microphone
    #[arg(long, value_name = "FILE")]
    pub wav: Option<PathBuf>,

    /// Silence timeout before the streaming engine gives up. Examples: 8s, 1m, 0 (disabled)
    #[arg(long, value_name = "DURATION", value_parser = parse_timeout_ms)]
    pub silence_timeout: Option<u64>,

    /// Shell command that rewrites raw text (receives it on stdin)
    #[arg(long, value_name = "CMD")]
    pub rewrite_command: Option<String>,

    /// Exit after the first completed utterance
    #[arg(long)]
    pub once: bool,

    /// Prevent automatic model download if the configured model is missing
    #[arg(long)]
    pub no_download: bool,
}

/// Parse a timeout string into milliseconds.
///
/// Supports any duration format accepted by `humantime`: bare numbers
/// (seconds), single-unit (`8s`, `1m`), and compound (`1m30s`).
fn parse_timeout_ms(s: &str) -> Result<u64, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs * 1000);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input devices
    Devices,

    /// Manage Whisper models
    Models {
        /// Action to perform
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Start the daemon (foreground process for systemd)
    Daemon {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/sotto.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Toggle a dictation session on/off via IPC
    Toggle {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/sotto.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Discard the current session via IPC
    Cancel {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/sotto.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Get daemon status via IPC
    Status {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/sotto.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Stop the daemon via IPC
    Shutdown {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/sotto.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Model management actions
#[derive(Subcommand, Debug)]
pub enum ModelsAction {
    /// List available models
    List,
    /// Download and install a model
    Install {
        /// Model name (e.g., base.en, small.en, tiny)
        name: String,
    },
    /// Remove an installed model from the cache
    Remove {
        /// Model name (e.g., base.en, small.en, tiny)
        name: String,
    },
}
