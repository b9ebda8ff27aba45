//! Daemon control over a Unix socket: wire protocol, server, client.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{daemon_is_running, send_command};
pub use protocol::{Command, Response};
pub use server::{CommandHandler, IpcServer};
