//! Local model storage
//!
//! Downloaded checkpoints are cached under the platform data directory so a
//! repo id only has to be fetched once.

pub mod huggingface;

use std::path::PathBuf;

/// Platform data directory for glmgen.
pub fn get_data_dir() -> Result<PathBuf, String> {
    directories::ProjectDirs::from("", "", "glmgen")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| "Could not determine data directory".to_string())
}

/// Directory where downloaded GGUF files land.
pub fn models_dir() -> Result<PathBuf, String> {
    Ok(get_data_dir()?.join("models"))
}
