//! Error types for mailvault

use thiserror::Error;

/// Result type alias using mailvault's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the store, index and search layers
#[derive(Error, Debug)]
pub enum Error {
    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Vector index corrupt: {0}")]
    IndexCorrupt(String),

    // Data errors
    #[error("Embedding vector is empty")]
    EmptyVector,

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Short machine-readable code for tool responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::Database(_) => "DATABASE_ERROR",
            Error::IndexCorrupt(_) => "INDEX_CORRUPT",
            Error::EmptyVector | Error::Embedding(_) => "EMBEDDING_ERROR",
            Error::InvalidPayload(_) => "INVALID_PAYLOAD",
            Error::Config(_) | Error::Yaml(_) => "CONFIG_ERROR",
            Error::Io(_) | Error::Json(_) => "INTERNAL_ERROR",
        }
    }
}
