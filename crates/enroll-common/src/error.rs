//! Error types shared across the enroll crates

use thiserror::Error;

/// Result type alias for enroll operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Errors that are not specific to a single pipeline stage
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Invalid identifier '{0}': only letters, digits and underscores are allowed")]
    InvalidIdentifier(String),
}

impl EtlError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
