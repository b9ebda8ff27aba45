//! Async Unix socket server for daemon control.

use crate::error::{Result, SottoError};
use crate::ipc::protocol::{Command, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Command processor plugged into the server, one call per connection.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> Response;
}

/// Unix socket IPC server. One JSON command line per connection, one JSON
/// response line back.
pub struct IpcServer {
    socket_path: PathBuf,
    shutdown: Arc<AtomicBool>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Default socket under `XDG_RUNTIME_DIR`, with a uid-scoped /tmp
    /// fallback.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(xdg_runtime).join("sotto.sock")
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/sotto-{}.sock", uid))
        }
    }

    /// Flag used to break the accept loop from a handler.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the socket and serves connections until shutdown.
    pub async fn serve<H>(&self, handler: H) -> Result<()>
    where
        H: CommandHandler + 'static,
    {
        // A stale socket from a crashed daemon blocks the bind.
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| SottoError::IpcSocket {
                message: format!("Failed to remove stale socket: {}", e),
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| SottoError::IpcSocket {
            message: format!("Failed to bind {}: {}", self.socket_path.display(), e),
        })?;

        let handler = Arc::new(handler);

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            // Short accept timeout so the shutdown flag is polled.
            let accepted =
                tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept())
                    .await;

            match accepted {
                Ok(Ok((stream, _))) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, handler).await {
                            eprintln!("sotto: ipc client error: {} ({})", e, e.cause_code());
                        }
                    });
                }
                Ok(Err(e)) => {
                    return Err(SottoError::IpcConnection {
                        message: format!("Failed to accept connection: {}", e),
                    });
                }
                Err(_) => continue,
            }
        }

        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        Ok(())
    }
}

async fn handle_connection<H>(stream: UnixStream, handler: Arc<H>) -> Result<()>
where
    H: CommandHandler,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader
        .read_line(&mut line)
        .await
        .map_err(|e| SottoError::IpcConnection {
            message: format!("Failed to read command: {}", e),
        })?;

    let response = match Command::from_json(line.trim()) {
        Ok(command) => handler.handle(command).await,
        Err(e) => {
            let err = SottoError::IpcProtocol {
                message: format!("Malformed command: {}", e),
            };
            Response::Error {
                message: err.to_string(),
                cause: err.cause_code().to_string(),
            }
        }
    };

    let mut payload = response.to_json().map_err(|e| SottoError::IpcProtocol {
        message: format!("Failed to serialize response: {}", e),
    })?;
    payload.push('\n');

    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| SottoError::IpcConnection {
            message: format!("Failed to write response: {}", e),
        })?;
    writer.flush().await.map_err(|e| SottoError::IpcConnection {
        message: format!("Failed to flush response: {}", e),
    })?;

    Ok(())
}
