//! Client side of the daemon socket.

use crate::error::{Result, SottoError};
use crate::ipc::protocol::{Command, Response};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Sends one command and reads the single response line.
pub async fn send_command(socket_path: &Path, command: Command) -> Result<Response> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| SottoError::IpcConnection {
            message: format!(
                "Failed to connect to daemon at {}: {}. Is the daemon running?",
                socket_path.display(),
                e
            ),
        })?;

    let (reader, mut writer) = stream.into_split();

    let mut line = command.to_json().map_err(|e| SottoError::IpcProtocol {
        message: format!("Failed to serialize command: {}", e),
    })?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| SottoError::IpcConnection {
            message: format!("Failed to send command: {}", e),
        })?;
    writer.flush().await.map_err(|e| SottoError::IpcConnection {
        message: format!("Failed to flush command: {}", e),
    })?;

    let mut reader = BufReader::new(reader);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .await
        .map_err(|e| SottoError::IpcConnection {
            message: format!("Failed to read response: {}", e),
        })?;

    Response::from_json(response_line.trim()).map_err(|e| SottoError::IpcProtocol {
        message: format!("Malformed response: {}", e),
    })
}

/// True when something answers a status probe on the socket.
pub async fn daemon_is_running(socket_path: &Path) -> bool {
    matches!(
        send_command(socket_path, Command::Status).await,
        Ok(Response::Status { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_failure_is_an_ipc_connection_error() {
        let err = send_command(Path::new("/nonexistent/sotto.sock"), Command::Status)
            .await
            .unwrap_err();
        assert_eq!(err.cause_code(), "ipc.connection");
    }

    #[tokio::test]
    async fn daemon_probe_is_false_without_a_daemon() {
        assert!(!daemon_is_running(Path::new("/nonexistent/sotto.sock")).await);
    }
}
