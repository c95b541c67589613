//! Durable per-job record stored under `job:{id}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vidsum_models::{AnalyzeVideoJob, JobState};

/// The queue's view of a job: the submitted payload plus lifecycle
/// bookkeeping. Exactly one record exists per job id; retries reuse it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: AnalyzeVideoJob,
    pub state: JobState,
    /// Lease attempts so far. Increments each time a worker leases the
    /// job, so a retry or stale-lease reclaim counts once it is picked up
    /// again; `requeue()` leaves it untouched.
    pub attempts: u32,
    /// Consumer name holding the lease while `state == Active`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    /// Last lease stamp; refreshed by the worker heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal error message, present when `state == Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(job: AnalyzeVideoJob) -> Self {
        Self {
            job,
            state: JobState::Queued,
            attempts: 0,
            consumer: None,
            lease_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Mark the record leased by `consumer`.
    pub fn lease(&mut self, consumer: &str) {
        self.state = JobState::Active;
        self.consumer = Some(consumer.to_string());
        self.lease_at = Some(Utc::now());
        self.attempts += 1;
    }

    /// Return the record to the waiting state (retry or stale reclaim).
    pub fn requeue(&mut self) {
        self.state = JobState::Queued;
        self.consumer = None;
        self.lease_at = None;
    }

    /// Whether an active lease is older than `timeout_secs`.
    pub fn lease_is_stale(&self, timeout_secs: i64) -> bool {
        if self.state != JobState::Active {
            return false;
        }
        match self.lease_at {
            Some(at) => (Utc::now() - at).num_seconds() > timeout_secs,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> AnalyzeVideoJob {
        AnalyzeVideoJob::new("/tmp/v.mp4", "v.mp4", "video/mp4", 1024, "gemini-2.5-flash", "u1")
    }

    #[test]
    fn lease_and_requeue_cycle() {
        let mut record = JobRecord::new(test_job());
        assert_eq!(record.state, JobState::Queued);
        assert_eq!(record.attempts, 0);

        record.lease("worker-1");
        assert_eq!(record.state, JobState::Active);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.consumer.as_deref(), Some("worker-1"));
        assert!(record.lease_at.is_some());

        record.requeue();
        assert_eq!(record.state, JobState::Queued);
        assert!(record.consumer.is_none());
        assert!(record.lease_at.is_none());
        // Attempts are preserved across requeues.
        assert_eq!(record.attempts, 1);
    }

    #[test]
    fn stale_lease_detection() {
        let mut record = JobRecord::new(test_job());
        record.lease("worker-1");
        assert!(!record.lease_is_stale(60));

        record.lease_at = Some(Utc::now() - chrono::Duration::seconds(120));
        assert!(record.lease_is_stale(60));

        // Only active records can be stale.
        record.requeue();
        assert!(!record.lease_is_stale(60));
    }
}
