//! Error types for media operations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while capturing and encoding.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ProgramNotFound(String),

    #[error("Encoder input already closed")]
    EncoderInputClosed,

    #[error("Capture bridge protocol error: {0}")]
    BridgeProtocol(String),

    #[error("Invalid capture chunk: {0}")]
    InvalidChunk(String),

    #[error("Watch failed: {0}")]
    Watch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MediaError {
    pub fn program_not_found(program: impl Into<String>) -> Self {
        Self::ProgramNotFound(program.into())
    }

    pub fn bridge_protocol(message: impl Into<String>) -> Self {
        Self::BridgeProtocol(message.into())
    }

    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch(message.into())
    }
}
