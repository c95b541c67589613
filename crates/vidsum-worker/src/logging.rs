//! Structured job logging utilities.

use tracing::{error, info, warn};
use vidsum_models::JobId;

/// Job logger for consistent lifecycle logging with `job_id` context.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.to_string(),
        }
    }

    pub fn start(&self, message: &str) {
        info!(job_id = %self.job_id, "Job started: {}", message);
    }

    pub fn progress(&self, message: &str) {
        info!(job_id = %self.job_id, "Job progress: {}", message);
    }

    pub fn warning(&self, message: &str) {
        warn!(job_id = %self.job_id, "Job warning: {}", message);
    }

    pub fn failure(&self, message: &str) {
        error!(job_id = %self.job_id, "Job error: {}", message);
    }

    pub fn completion(&self, message: &str) {
        info!(job_id = %self.job_id, "Job completed: {}", message);
    }
}
