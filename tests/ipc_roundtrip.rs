//! Client to server roundtrips over a real Unix socket.

use sotto::ipc::client::{daemon_is_running, send_command};
use sotto::ipc::protocol::{Command, Response};
use sotto::ipc::server::{CommandHandler, IpcServer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Canned daemon for protocol tests.
struct StubHandler {
    toggles: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl CommandHandler for StubHandler {
    async fn handle(&self, command: Command) -> Response {
        match command {
            Command::Toggle => {
                self.toggles.fetch_add(1, Ordering::SeqCst);
                Response::Ok
            }
            Command::Cancel => Response::Ok,
            Command::Status => Response::Status {
                state: "listening".to_string(),
                text: "partial words".to_string(),
                last_error: None,
            },
            Command::Shutdown => {
                self.shutdown.store(true, Ordering::SeqCst);
                Response::Ok
            }
        }
    }
}

async fn spawn_server() -> (
    std::path::PathBuf,
    Arc<AtomicUsize>,
    tokio::task::JoinHandle<()>,
    tempfile::TempDir,
) {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("sotto.sock");
    let server = Arc::new(IpcServer::new(socket_path.clone()));
    let toggles = Arc::new(AtomicUsize::new(0));
    let handler = StubHandler {
        toggles: Arc::clone(&toggles),
        shutdown: server.shutdown_flag(),
    };

    let server_task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            server.serve(handler).await.unwrap();
        })
    };

    // Wait for the bind.
    for _ in 0..100 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    (socket_path, toggles, server_task, dir)
}

#[tokio::test]
async fn toggle_and_status_round_trip() {
    let (socket_path, toggles, server_task, _dir) = spawn_server().await;

    assert_eq!(
        send_command(&socket_path, Command::Toggle).await.unwrap(),
        Response::Ok
    );
    assert_eq!(toggles.load(Ordering::SeqCst), 1);

    match send_command(&socket_path, Command::Status).await.unwrap() {
        Response::Status {
            state,
            text,
            last_error,
        } => {
            assert_eq!(state, "listening");
            assert_eq!(text, "partial words");
            assert_eq!(last_error, None);
        }
        other => panic!("expected status response, got {:?}", other),
    }

    assert!(daemon_is_running(&socket_path).await);

    // Shutdown breaks the accept loop and removes the socket.
    assert_eq!(
        send_command(&socket_path, Command::Shutdown).await.unwrap(),
        Response::Ok
    );
    server_task.await.unwrap();
    assert!(!socket_path.exists());
    assert!(!daemon_is_running(&socket_path).await);
}

#[tokio::test]
async fn commands_from_concurrent_clients_all_land() {
    let (socket_path, toggles, server_task, _dir) = spawn_server().await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let path = socket_path.clone();
        tasks.push(tokio::spawn(async move {
            send_command(&path, Command::Toggle).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), Response::Ok);
    }
    assert_eq!(toggles.load(Ordering::SeqCst), 8);

    send_command(&socket_path, Command::Shutdown).await.unwrap();
    server_task.await.unwrap();
}
