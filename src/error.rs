//! Error types for the loan conversation engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Run id unavailable: {0}")]
    RunIdUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
