//! Worker error types.

use thiserror::Error;

use vidsum_gemini::GeminiError;
use vidsum_queue::QueueError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Invalid input: {0}")]
    InputInvalid(String),

    #[error("Trim failed: {0}")]
    TrimFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("Analysis service error: {0}")]
    Gemini(#[from] GeminiError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn input_invalid(msg: impl Into<String>) -> Self {
        Self::InputInvalid(msg.into())
    }

    /// Whether the queue should schedule a retry for this failure.
    ///
    /// Exhausted credentials and transient service trouble are worth
    /// another attempt; bad input, cancellation, terminal upload failures
    /// and deadline breaches are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Gemini(e) => match e {
                GeminiError::UploadTimedOut { .. } => false,
                GeminiError::ContextExceeded(_) => false,
                other => other.is_transient(),
            },
            WorkerError::Queue(e) => e.is_transient(),
            _ => false,
        }
    }

    /// True for cooperative cancellation, wherever in the pipeline it
    /// surfaced.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            WorkerError::Cancelled | WorkerError::Gemini(GeminiError::Cancelled)
        )
    }

    /// Message safe to publish to the ingress channel: human-readable and
    /// free of credentials and stack frames.
    pub fn user_message(&self) -> String {
        if self.is_cancelled() {
            return "cancelled".to_string();
        }
        match self {
            WorkerError::Gemini(GeminiError::ContextExceeded(_)) => {
                "This video is too large for the analysis model, even after splitting. \
                 Try a shorter recording."
                    .to_string()
            }
            WorkerError::Gemini(GeminiError::UploadTimedOut { waited }) => format!(
                "The analysis service did not finish ingesting the file after {}s.",
                waited.as_secs()
            ),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn retryability_by_class() {
        assert!(WorkerError::Gemini(GeminiError::NoCapacity).is_retryable());
        assert!(WorkerError::Gemini(GeminiError::Transient("503".into())).is_retryable());
        assert!(!WorkerError::Gemini(GeminiError::Terminal("400".into())).is_retryable());
        assert!(!WorkerError::Gemini(GeminiError::UploadTimedOut {
            waited: Duration::from_secs(900)
        })
        .is_retryable());
        assert!(!WorkerError::input_invalid("too big").is_retryable());
        assert!(!WorkerError::Cancelled.is_retryable());
    }

    #[test]
    fn cancelled_user_message_is_bare() {
        assert_eq!(WorkerError::Cancelled.user_message(), "cancelled");
        assert_eq!(
            WorkerError::Gemini(GeminiError::Cancelled).user_message(),
            "cancelled"
        );
        assert!(WorkerError::Gemini(GeminiError::Cancelled).is_cancelled());
    }
}
