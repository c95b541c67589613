//! Job definitions for queue processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
///
/// `Failed` may re-enter `Queued` through the retry policy; the other
/// terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting in queue
    #[default]
    Queued,
    /// Job is leased by a worker
    Active,
    /// Job completed successfully
    Succeeded,
    /// Job failed
    Failed,
    /// Job was cancelled before completion
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A video analysis job, the unit of work the queue dispatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeVideoJob {
    /// Unique job ID, assigned at enqueue
    pub job_id: JobId,
    /// Opaque channel reference used to publish results back to the ingress
    pub chat_ref: String,
    /// Opaque message reference for threading replies
    pub reply_ref: String,
    /// Local filesystem path to the source video
    pub source_path: String,
    /// Human-readable name shown in progress messages
    pub display_name: String,
    /// MIME type of the source file
    pub mime_type: String,
    /// Source file size in bytes
    pub size_bytes: u64,
    /// External model variant selector
    pub model_id: String,
    /// Who submitted the job
    pub submitter_id: String,
    /// Optional display label for the submitter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitter_label: Option<String>,
    /// When the job was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl AnalyzeVideoJob {
    /// Create a new analysis job.
    pub fn new(
        source_path: impl Into<String>,
        display_name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
        model_id: impl Into<String>,
        submitter_id: impl Into<String>,
    ) -> Self {
        Self {
            job_id: JobId::new(),
            chat_ref: String::new(),
            reply_ref: String::new(),
            source_path: source_path.into(),
            display_name: display_name.into(),
            mime_type: mime_type.into(),
            size_bytes,
            model_id: model_id.into(),
            submitter_id: submitter_id.into(),
            submitter_label: None,
            enqueued_at: Utc::now(),
        }
    }

    /// Set the ingress channel references.
    pub fn with_channel(mut self, chat_ref: impl Into<String>, reply_ref: impl Into<String>) -> Self {
        self.chat_ref = chat_ref.into();
        self.reply_ref = reply_ref.into();
        self
    }

    /// Set the submitter label.
    pub fn with_submitter_label(mut self, label: impl Into<String>) -> Self {
        self.submitter_label = Some(label.into());
        self
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("analyze:{}:{}", self.submitter_id, self.source_path)
    }
}
