//! Error types for workflow-memory

use thiserror::Error;

/// Result type alias for workflow-memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in workflow-memory
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "yaml")]
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Codec error at line {line}: {message}")]
    Codec { line: usize, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

impl Error {
    pub fn codec(line: usize, message: impl Into<String>) -> Self {
        Self::Codec {
            line,
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// True for errors raised while decoding stored text
    pub fn is_decode(&self) -> bool {
        match self {
            Error::Json(_) | Error::Codec { .. } => true,
            #[cfg(feature = "yaml")]
            Error::Yaml(_) => true,
            _ => false,
        }
    }
}
