//! Model download and cache management.

use crate::error::{Result, SottoError};
use crate::models::catalog::{get_model, resolve_name};
use std::path::PathBuf;

#[cfg(feature = "model-download")]
use {
    crate::models::catalog::ModelInfo,
    futures_util::StreamExt,
    indicatif::{ProgressBar, ProgressStyle},
    sha2::{Digest, Sha256},
    std::fs,
    std::io::Write,
    std::path::Path,
};

/// Directory models are cached in (`~/.cache/sotto/models`).
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("sotto")
        .join("models")
}

/// Cache path for a variant. The file may not exist yet.
pub fn model_path(name: &str) -> PathBuf {
    models_dir().join(format!("ggml-{}.bin", resolve_name(name)))
}

pub fn is_model_installed(name: &str) -> bool {
    model_path(name).exists()
}

/// Resolves a model argument to an on-disk path: an explicit file path is
/// used as-is, a catalog name maps into the cache directory.
pub fn resolve_model_path(name_or_path: &str) -> Result<PathBuf> {
    let as_path = PathBuf::from(name_or_path);
    if as_path.exists() {
        return Ok(as_path);
    }
    if get_model(name_or_path).is_none() {
        return Err(SottoError::UnknownModel {
            name: name_or_path.to_string(),
        });
    }
    Ok(model_path(name_or_path))
}

#[cfg(feature = "model-download")]
async fn download_to_path(info: &ModelInfo, output_path: &Path, progress: bool) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|e| SottoError::DownloadFailed {
            message: format!("Failed to create models directory: {}", e),
        })?;
    }

    if progress {
        eprintln!("Downloading {} ({} MB)...", info.name, info.size_mb);
    }

    let response = reqwest::Client::new()
        .get(info.url)
        .send()
        .await
        .map_err(|e| SottoError::DownloadFailed {
            message: format!("Failed to start download: {}", e),
        })?;

    if !response.status().is_success() {
        return Err(SottoError::DownloadFailed {
            message: format!("Download failed with status {}", response.status()),
        });
    }

    let total_size = response.content_length().unwrap_or(0);
    let bar = if progress {
        let bar = ProgressBar::new(total_size);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Some(bar)
    } else {
        None
    };

    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    let mut file = fs::File::create(output_path).map_err(|e| SottoError::DownloadFailed {
        message: format!("Failed to create {}: {}", output_path.display(), e),
    })?;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SottoError::DownloadFailed {
            message: format!("Failed to read download chunk: {}", e),
        })?;
        file.write_all(&chunk)
            .map_err(|e| SottoError::DownloadFailed {
                message: format!("Failed to write to {}: {}", output_path.display(), e),
            })?;
        hasher.update(&chunk);
        if let Some(bar) = &bar {
            bar.inc(chunk.len() as u64);
        }
    }

    if let Some(bar) = bar {
        bar.finish_with_message("Downloaded");
    }

    if let Some(expected) = info.sha256 {
        let actual = format!("{:x}", hasher.finalize());
        if actual != expected {
            if let Err(e) = fs::remove_file(output_path) {
                eprintln!("sotto: failed to remove corrupted download: {}", e);
            }
            return Err(SottoError::ChecksumMismatch {
                name: info.name.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
    }

    if progress {
        eprintln!("Model installed to {}", output_path.display());
    }
    Ok(())
}

/// Downloads a catalog variant into the cache. Already-installed models are
/// a no-op.
#[cfg(feature = "model-download")]
pub async fn download_model(name: &str, progress: bool) -> Result<PathBuf> {
    let info = get_model(name).ok_or_else(|| SottoError::UnknownModel {
        name: name.to_string(),
    })?;

    let path = model_path(name);
    if path.exists() {
        if progress {
            eprintln!("Model '{}' already installed at {}", name, path.display());
        }
        return Ok(path);
    }

    download_to_path(info, &path, progress).await?;
    Ok(path)
}

/// Removes an installed model from the cache.
pub fn remove_model(name: &str) -> Result<bool> {
    let path = model_path(name);
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&path)?;
    Ok(true)
}
