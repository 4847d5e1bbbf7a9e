// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VqaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Engine failure: {0}")]
    Engine(String),

    #[error("Malformed metrics data: {0}")]
    DataFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Plotting error: {0}")]
    Plot(String),
}

impl VqaError {
    /// Maps a failed read of `path` to `NotFound` when the file is missing.
    pub fn from_read(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            VqaError::NotFound(path.to_path_buf())
        } else {
            VqaError::Io(err)
        }
    }
}

// Define a standard Result type for the crate
pub type Result<T> = std::result::Result<T, VqaError>;
