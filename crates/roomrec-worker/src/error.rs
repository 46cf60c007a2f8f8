//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Malformed message: {0}")]
    MessageParse(String),

    #[error("Room not ready: {0}")]
    ValidationRejected(String),

    #[error("Failed to spawn session: {0}")]
    SpawnFailed(String),

    #[error("Session failed: {0}")]
    SessionFatal(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Encoder IO error: {0}")]
    EncoderIo(String),

    #[error("Storage error: {0}")]
    Storage(#[from] roomrec_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] roomrec_queue::QueueError),

    #[error("Media error: {0}")]
    Media(#[from] roomrec_media::MediaError),

    #[error("Video API error: {0}")]
    Video(#[from] roomrec_video::VideoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn message_parse(msg: impl Into<String>) -> Self {
        Self::MessageParse(msg.into())
    }

    pub fn validation_rejected(msg: impl Into<String>) -> Self {
        Self::ValidationRejected(msg.into())
    }

    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    pub fn session_fatal(msg: impl Into<String>) -> Self {
        Self::SessionFatal(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn encoder_io(msg: impl Into<String>) -> Self {
        Self::EncoderIo(msg.into())
    }
}
