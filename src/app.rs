//! Application wiring: resolves a configuration into a running session,
//! either interactive (stdin toggles) or daemonized behind the IPC socket.

use crate::audio::AudioSource;
use crate::cli::Cli;
use crate::config::{Config, EngineKind};
use crate::engine::{RecognitionEngine, RecognitionUpdate};
use crate::error::{Result, SottoError};
use crate::ipc::protocol::{Command, Response};
use crate::ipc::server::{CommandHandler, IpcServer};
use crate::models;
use crate::session::{
    CommandRewriter, PassthroughRewriter, Rewriter, SessionHandle, SessionRunner, SessionState,
    StdoutSink,
};
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::io::AsyncBufReadExt;

/// Folds CLI flags into the loaded configuration. Flags win over both the
/// file and environment overrides.
pub fn apply_cli_overrides(config: &mut Config, cli: &Cli) -> Result<()> {
    if let Some(engine) = &cli.engine {
        config.recognition.engine = engine.parse()?;
    }
    if let Some(model) = &cli.model {
        config.recognition.model = model.clone();
    }
    if let Some(locale) = &cli.locale {
        config.recognition.locale = locale.clone();
    }
    if let Some(device) = &cli.device {
        config.audio.device = Some(device.clone());
    }
    if let Some(timeout_ms) = cli.silence_timeout {
        config.session.silence_timeout_ms = timeout_ms;
    }
    if let Some(command) = &cli.rewrite_command {
        config.rewrite.command = Some(command.clone());
    }
    Ok(())
}

/// Resolves the configured model to an on-disk path, downloading it into
/// the cache when missing and downloads are allowed.
pub async fn resolve_model(config: &Config, no_download: bool, quiet: bool) -> Result<PathBuf> {
    let path = models::resolve_model_path(&config.recognition.model)?;
    if path.exists() {
        return Ok(path);
    }

    #[cfg(feature = "model-download")]
    if !no_download {
        return models::download_model(&config.recognition.model, !quiet).await;
    }

    let _ = (no_download, quiet);
    Err(SottoError::ModelNotFound {
        path: path.to_string_lossy().to_string(),
    })
}

/// Builds the configured recognition engine plus its event channel.
#[cfg(feature = "whisper")]
pub fn build_engine(
    config: &Config,
    model_path: PathBuf,
) -> Result<(Arc<dyn RecognitionEngine>, Receiver<RecognitionUpdate>)> {
    use crate::engine::whisper::{WhisperConfig, WhisperRecognizer, WhisperStreamingBackend};
    use crate::engine::{BatchEngine, StreamingEngine};
    use crate::text::HallucinationFilter;

    let context_stable = models::get_model(&config.recognition.model)
        .map(|m| m.context_stable)
        .unwrap_or(false);

    let whisper_config = WhisperConfig {
        model_path,
        threads: match config.recognition.threads {
            0 => None,
            n => Some(n),
        },
        context_stable,
    };
    let recognizer = Arc::new(WhisperRecognizer::new(whisper_config)?);

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let engine: Arc<dyn RecognitionEngine> = match config.recognition.engine {
        EngineKind::Streaming => {
            let backend = Box::new(WhisperStreamingBackend::new(recognizer));
            Arc::new(StreamingEngine::new(backend, events_tx))
        }
        EngineKind::Batch => Arc::new(BatchEngine::new(
            recognizer,
            HallucinationFilter::default(),
            events_tx,
        )),
    };
    Ok((engine, events_rx))
}

#[cfg(not(feature = "whisper"))]
pub fn build_engine(
    _config: &Config,
    _model_path: PathBuf,
) -> Result<(Arc<dyn RecognitionEngine>, Receiver<RecognitionUpdate>)> {
    Err(SottoError::RecognizerUnavailable {
        message: "this build has no recognition backend (enable the 'whisper' feature)"
            .to_string(),
    })
}

/// Picks the audio source: a WAV file when given, the capture device
/// otherwise.
pub fn build_audio_source(config: &Config, wav: Option<&Path>) -> Result<Box<dyn AudioSource>> {
    if let Some(path) = wav {
        return Ok(Box::new(crate::audio::WavAudioSource::new(path)));
    }

    #[cfg(feature = "cpal-audio")]
    {
        let source = crate::audio::capture::CpalAudioSource::new(config.audio.device.as_deref())?;
        Ok(Box::new(source))
    }
    #[cfg(not(feature = "cpal-audio"))]
    {
        let _ = config;
        Err(SottoError::AudioCapture {
            message: "this build has no capture backend (enable the 'cpal-audio' feature)"
                .to_string(),
        })
    }
}

pub fn build_rewriter(config: &Config) -> Arc<dyn Rewriter> {
    match &config.rewrite.command {
        Some(command) => Arc::new(CommandRewriter::new(command.clone())),
        None => Arc::new(PassthroughRewriter),
    }
}

fn build_session(
    config: &Config,
    wav: Option<&Path>,
    model_path: PathBuf,
) -> Result<(SessionRunner, SessionHandle)> {
    let (engine, events) = build_engine(config, model_path)?;
    let audio = build_audio_source(config, wav)?;
    let rewriter = build_rewriter(config);
    let sink = Arc::new(StdoutSink);
    Ok(SessionRunner::new(
        engine,
        events,
        audio,
        rewriter,
        sink,
        config.session_config(),
    ))
}

/// Interactive mode: Enter toggles, `c` cancels, `q` quits. With `once`,
/// the loop ends after the first completed utterance.
pub async fn run_interactive(
    config: Config,
    wav: Option<PathBuf>,
    quiet: bool,
    no_download: bool,
    once: bool,
) -> Result<()> {
    let model_path = resolve_model(&config, no_download, quiet).await?;
    let (runner, handle) = build_session(&config, wav.as_deref(), model_path)?;
    let worker = runner.spawn();

    if !quiet {
        eprintln!(
            "sotto: ready ({} engine, model '{}')",
            match config.recognition.engine {
                EngineKind::Streaming => "streaming",
                EngineKind::Batch => "batch",
            },
            config.recognition.model
        );
        eprintln!("sotto: press Enter to toggle dictation, 'c' to cancel, 'q' to quit");
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut dictating = false;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            // stdin closed
            Ok(None) | Err(_) => break,
        };
        match line.trim() {
            "" => {
                handle.toggle();
                let status = blocking_status(&handle).await;
                if !quiet && let Some(status) = &status {
                    eprintln!("sotto: {}", status.state);
                }
                match status.map(|s| s.state) {
                    Some(SessionState::Listening) => dictating = true,
                    Some(_) if dictating && once => {
                        // Let the in-flight utterance finish before leaving.
                        while blocking_status(&handle).await.map(|s| s.state)
                            == Some(SessionState::Processing)
                        {
                            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                        }
                        break;
                    }
                    _ => {}
                }
            }
            "c" => {
                handle.cancel();
                if !quiet {
                    eprintln!("sotto: cancelled");
                }
            }
            "q" => break,
            other => {
                if !quiet {
                    eprintln!("sotto: unknown input '{}'", other);
                }
            }
        }
    }

    handle.shutdown();
    let _ = worker.join();
    Ok(())
}

/// Daemon mode: the session lives behind the Unix socket until a shutdown
/// command arrives.
pub async fn run_daemon(
    config: Config,
    socket_path: Option<PathBuf>,
    wav: Option<PathBuf>,
    quiet: bool,
    no_download: bool,
) -> Result<()> {
    let model_path = resolve_model(&config, no_download, quiet).await?;
    let (runner, handle) = build_session(&config, wav.as_deref(), model_path)?;
    let worker = runner.spawn();

    let socket_path = socket_path.unwrap_or_else(IpcServer::default_socket_path);
    let server = IpcServer::new(socket_path);

    if !quiet {
        eprintln!("sotto: listening at {}", server.socket_path().display());
    }

    let handler = SessionCommandHandler {
        session: handle.clone(),
        shutdown: server.shutdown_flag(),
    };
    let result = server.serve(handler).await;

    handle.shutdown();
    let _ = worker.join();
    result
}

/// Bridges IPC commands onto the session control channel.
struct SessionCommandHandler {
    session: SessionHandle,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

#[async_trait::async_trait]
impl CommandHandler for SessionCommandHandler {
    async fn handle(&self, command: Command) -> Response {
        match command {
            Command::Toggle => {
                if self.session.toggle() {
                    Response::Ok
                } else {
                    session_gone()
                }
            }
            Command::Cancel => {
                if self.session.cancel() {
                    Response::Ok
                } else {
                    session_gone()
                }
            }
            Command::Status => match blocking_status(&self.session).await {
                Some(status) => Response::Status {
                    state: status.state.to_string(),
                    text: status.text,
                    last_error: status.last_error,
                },
                None => session_gone(),
            },
            Command::Shutdown => {
                self.shutdown.store(true, Ordering::SeqCst);
                self.session.shutdown();
                Response::Ok
            }
        }
    }
}

/// Status replies wait on the control thread; keep that off the async
/// executor.
async fn blocking_status(handle: &SessionHandle) -> Option<crate::session::SessionStatus> {
    let handle = handle.clone();
    tokio::task::spawn_blocking(move || handle.status())
        .await
        .ok()
        .flatten()
}

fn session_gone() -> Response {
    let err = SottoError::IpcConnection {
        message: "session thread is gone".to_string(),
    };
    Response::Error {
        message: err.to_string(),
        cause: err.cause_code().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_overrides_win_over_config() {
        let cli = Cli::try_parse_from([
            "sotto",
            "--engine",
            "streaming",
            "--model",
            "tiny.en",
            "--locale",
            "en",
            "--silence-timeout",
            "5s",
            "--rewrite-command",
            "cat",
        ])
        .unwrap();

        let mut config = Config::default();
        apply_cli_overrides(&mut config, &cli).unwrap();

        assert_eq!(config.recognition.engine, EngineKind::Streaming);
        assert_eq!(config.recognition.model, "tiny.en");
        assert_eq!(config.recognition.locale, "en");
        assert_eq!(config.session.silence_timeout_ms, 5000);
        assert_eq!(config.rewrite.command.as_deref(), Some("cat"));
    }

    #[test]
    fn bad_engine_flag_is_a_config_error() {
        let cli = Cli::try_parse_from(["sotto", "--engine", "quantum"]).unwrap();
        let mut config = Config::default();
        let err = apply_cli_overrides(&mut config, &cli).unwrap_err();
        assert_eq!(err.cause_code(), "config.invalid_value");
    }

    #[test]
    fn rewriter_defaults_to_passthrough() {
        let config = Config::default();
        let rewriter = build_rewriter(&config);
        assert_eq!(rewriter.rewrite("hello world").unwrap(), "hello world");
    }

    #[test]
    fn wav_flag_selects_the_file_source() {
        let config = Config::default();
        let source = build_audio_source(&config, Some(Path::new("/tmp/clip.wav")));
        assert!(source.is_ok());
    }
}
