//! Progress stages and event schemas published over the job channel.

use serde::{Deserialize, Serialize};

use crate::analysis::MergedArtifact;
use crate::job::JobId;

/// High-level phase of a job's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Downloading,
    Uploading,
    Processing,
    Analyzing,
    Trimming,
    Sending,
    Complete,
    Error,
}

impl JobStage {
    /// Ordering rank used for monotonicity checks. `Error` is terminal and
    /// may follow any stage.
    pub fn rank(&self) -> u8 {
        match self {
            JobStage::Queued => 0,
            JobStage::Downloading => 1,
            JobStage::Uploading => 2,
            JobStage::Processing => 3,
            JobStage::Analyzing => 4,
            JobStage::Trimming => 5,
            JobStage::Sending => 6,
            JobStage::Complete => 7,
            JobStage::Error => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Queued => "queued",
            JobStage::Downloading => "downloading",
            JobStage::Uploading => "uploading",
            JobStage::Processing => "processing",
            JobStage::Analyzing => "analyzing",
            JobStage::Trimming => "trimming",
            JobStage::Sending => "sending",
            JobStage::Complete => "complete",
            JobStage::Error => "error",
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A progress snapshot published whenever a worker advances.
///
/// `(stage.rank(), percent)` is monotonic within a job, except for the
/// terminal `Error` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub stage: JobStage,
    /// Overall percent, 0-100
    pub percent: u8,
    /// Human-readable status line
    pub message: String,
    /// Estimated seconds remaining, when computable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
}

impl JobProgress {
    pub fn new(stage: JobStage, percent: u8, message: impl Into<String>) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            message: message.into(),
            eta_seconds: None,
        }
    }

    pub fn with_eta(mut self, eta_seconds: u64) -> Self {
        self.eta_seconds = Some(eta_seconds);
        self
    }

    /// True if `next` does not move backwards relative to `self`.
    pub fn is_monotonic_successor(&self, next: &JobProgress) -> bool {
        if next.stage == JobStage::Error {
            return true;
        }
        (next.stage.rank(), next.percent) >= (self.stage.rank(), self.percent)
    }
}

/// Event published on a job's progress channel.
///
/// Every job publishes at most one terminal event: `Result` or `Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Progress {
        job_id: JobId,
        stage: JobStage,
        percent: u8,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<u64>,
    },
    Result {
        job_id: JobId,
        artifact: Box<MergedArtifact>,
    },
    Error {
        job_id: JobId,
        message: String,
    },
}

impl JobEvent {
    pub fn progress(job_id: &JobId, progress: &JobProgress) -> Self {
        JobEvent::Progress {
            job_id: job_id.clone(),
            stage: progress.stage,
            percent: progress.percent,
            message: progress.message.clone(),
            eta_seconds: progress.eta_seconds,
        }
    }

    pub fn result(job_id: &JobId, artifact: MergedArtifact) -> Self {
        JobEvent::Result {
            job_id: job_id.clone(),
            artifact: Box::new(artifact),
        }
    }

    pub fn error(job_id: &JobId, message: impl Into<String>) -> Self {
        JobEvent::Error {
            job_id: job_id.clone(),
            message: message.into(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Progress { job_id, .. } => job_id,
            JobEvent::Result { job_id, .. } => job_id,
            JobEvent::Error { job_id, .. } => job_id,
        }
    }

    /// True for `Result` and `Error` events.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress { .. })
    }
}
