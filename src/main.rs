use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use sotto::app;
use sotto::cli::{Cli, Commands, ModelsAction};
use sotto::config::Config;
use sotto::error::SottoError;
use sotto::ipc::client::send_command;
use sotto::ipc::protocol::{Command, Response};
use sotto::ipc::server::IpcServer;
use sotto::models;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => {
            let mut config = load_config(cli.config.as_deref())?;
            app::apply_cli_overrides(&mut config, &cli)?;
            app::run_interactive(config, cli.wav.clone(), cli.quiet, cli.no_download, cli.once)
                .await?;
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Models { ref action }) => {
            handle_models_command(action).await?;
        }
        Some(Commands::Daemon { ref socket }) => {
            let mut config = load_config(cli.config.as_deref())?;
            app::apply_cli_overrides(&mut config, &cli)?;
            app::run_daemon(
                config,
                socket.clone(),
                cli.wav.clone(),
                cli.quiet,
                cli.no_download,
            )
            .await?;
        }
        Some(Commands::Toggle { ref socket }) => {
            handle_ipc_command(socket.clone(), Command::Toggle).await?;
        }
        Some(Commands::Cancel { ref socket }) => {
            handle_ipc_command(socket.clone(), Command::Cancel).await?;
        }
        Some(Commands::Status { ref socket }) => {
            handle_ipc_command(socket.clone(), Command::Status).await?;
        }
        Some(Commands::Shutdown { ref socket }) => {
            handle_ipc_command(socket.clone(), Command::Shutdown).await?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "sotto", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/sotto/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };
    Ok(config.with_env_overrides()?)
}

/// List available audio input devices.
fn list_audio_devices() -> Result<()> {
    #[cfg(feature = "cpal-audio")]
    {
        let devices = sotto::audio::capture::list_devices()?;

        if devices.is_empty() {
            eprintln!("No audio input devices found");
            std::process::exit(1);
        }

        println!("Available audio input devices:");
        for (idx, device) in devices.iter().enumerate() {
            println!("  [{}] {}", idx, device);
        }
    }
    #[cfg(not(feature = "cpal-audio"))]
    eprintln!("This build has no capture backend (enable the 'cpal-audio' feature)");

    Ok(())
}

/// Handle model management commands.
async fn handle_models_command(action: &ModelsAction) -> Result<()> {
    match action {
        ModelsAction::List => {
            println!("Available models:");
            for model in models::list_models() {
                let installed = if models::is_model_installed(model.name) {
                    format!(" {}", "[installed]".green())
                } else {
                    String::new()
                };
                let scope = if model.english_only {
                    "English-only"
                } else {
                    "multilingual"
                };
                println!(
                    "  {:<12} {:>5} MB  {}{}",
                    model.name, model.size_mb, scope, installed
                );
            }
        }
        ModelsAction::Install { name } => {
            #[cfg(feature = "model-download")]
            {
                let path = models::download_model(name, true).await?;
                println!("Model '{}' installed successfully", name);
                println!("Location: {}", path.display());
            }
            #[cfg(not(feature = "model-download"))]
            {
                eprintln!(
                    "This build cannot download models (enable the 'model-download' feature). \
                     Place ggml-{}.bin under {} manually.",
                    models::resolve_name(name),
                    models::models_dir().display()
                );
                std::process::exit(1);
            }
        }
        ModelsAction::Remove { name } => {
            if models::remove_model(name)? {
                println!("Model '{}' removed", name);
            } else {
                eprintln!("Model '{}' is not installed", name);
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

/// Send a command to the daemon and print the response.
async fn handle_ipc_command(socket_path: Option<PathBuf>, command: Command) -> Result<()> {
    let socket_path = socket_path.unwrap_or_else(IpcServer::default_socket_path);

    match send_command(&socket_path, command).await {
        Ok(Response::Ok) => Ok(()),
        Ok(Response::Status {
            state,
            text,
            last_error,
        }) => {
            println!("state: {}", state);
            if !text.is_empty() {
                println!("text: {}", text);
            }
            if let Some(error) = last_error {
                println!("last error: {}", error);
            }
            Ok(())
        }
        Ok(Response::Error { message, cause }) => {
            eprintln!("{} {} ({})", "sotto: daemon error:".red(), message, cause);
            std::process::exit(1);
        }
        Err(e @ SottoError::IpcConnection { .. }) => {
            eprintln!("sotto: {}", e);
            eprintln!("Start it with: sotto daemon");
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
