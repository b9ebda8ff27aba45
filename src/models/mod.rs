//! Whisper model catalog and cache.

pub mod catalog;
pub mod download;

pub use catalog::{MODELS, ModelInfo, default_model, get_model, list_models, resolve_name};
#[cfg(feature = "model-download")]
pub use download::download_model;
pub use download::{is_model_installed, model_path, models_dir, remove_model, resolve_model_path};
