// src/error.rs - Error types for the tracking pipeline
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the library. Malformed payload fields and unresolved
/// lookups are not errors; they are logged and skipped where they occur.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to read config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Sample file for voice '{key}' does not exist: {}", path.display())]
    MissingSample { key: String, path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Undecodable transport line: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
