//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is full ({max} waiting jobs)")]
    QueueFull { max: usize },

    #[error("A job for this file is already queued or running")]
    DuplicateJob,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// True when the caller should simply retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Redis(_) | QueueError::ConnectionFailed(_))
    }
}
