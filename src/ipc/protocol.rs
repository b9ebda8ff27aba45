//! JSON line protocol between the CLI and the daemon.

use serde::{Deserialize, Serialize};

/// Commands the CLI sends to a running daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Start or finish the current dictation session.
    Toggle,
    /// Abort the current dictation without emitting text.
    Cancel,
    /// Query daemon state.
    Status,
    /// Shut the daemon down.
    Shutdown,
}

/// Responses the daemon sends back. Errors always carry the stable cause
/// code so scripting against the daemon does not depend on phrasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Status {
        state: String,
        text: String,
        last_error: Option<String>,
    },
    Error {
        message: String,
        cause: String,
    },
}

impl Command {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl Response {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
