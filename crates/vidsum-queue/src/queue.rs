//! Durable bounded FIFO job queue over Redis lists.
//!
//! Layout:
//! - `job:{id}` - serialized [`JobRecord`]
//! - `queue:waiting` / `queue:active` / `queue:succeeded` / `queue:failed` - job id lists
//! - `queue:delayed` - sorted set of job ids scheduled for retry
//! - `dedup:{key}` - duplicate-submit guard with TTL
//!
//! A lease is an atomic `BLMOVE queue:waiting -> queue:active`; stale leases
//! are reclaimed by [`JobQueue::sweep_stale`].

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vidsum_models::{AnalyzeVideoJob, JobId, JobState};

use crate::error::{QueueError, QueueResult};
use crate::record::JobRecord;

const WAITING_LIST: &str = "queue:waiting";
const ACTIVE_LIST: &str = "queue:active";
const SUCCEEDED_LIST: &str = "queue:succeeded";
const FAILED_LIST: &str = "queue:failed";
const DELAYED_SET: &str = "queue:delayed";

/// Retained terminal records: last 100 succeeded, last 50 failed.
const SUCCEEDED_RETAIN: isize = 100;
const FAILED_RETAIN: isize = 50;
/// Terminal job records expire after 24 hours.
const TERMINAL_RECORD_TTL_SECS: i64 = 24 * 3600;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL; `rediss://` enables TLS
    pub queue_url: String,
    /// Maximum number of waiting jobs accepted at submit
    pub max_waiting: usize,
    /// Maximum lease attempts before a retriable failure becomes terminal
    pub max_attempts: u32,
    /// Base delay for retry backoff (doubles each attempt)
    pub retry_base_delay: Duration,
    /// Cap on the retry backoff delay
    pub retry_max_delay: Duration,
    /// Active leases older than this are reclaimed by the sweeper
    pub lease_timeout: Duration,
    /// TTL of the duplicate-submit guard
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_url: "redis://localhost:6379".to_string(),
            max_waiting: 10,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(300),
            lease_timeout: Duration::from_secs(900),
            dedup_ttl: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_url: std::env::var("QUEUE_URL")
                .unwrap_or_else(|_| defaults.queue_url.clone()),
            max_waiting: std::env::var("MAX_QUEUE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_waiting),
            max_attempts: std::env::var("MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
            retry_base_delay: Duration::from_secs(
                std::env::var("RETRY_BASE_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            retry_max_delay: defaults.retry_max_delay,
            lease_timeout: Duration::from_secs(
                std::env::var("LEASE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(900),
            ),
            dedup_ttl: defaults.dedup_ttl,
        }
    }
}

/// Receipt returned to the ingress at submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    /// 1-based position among waiting jobs
    pub position: usize,
}

/// A leased job handed to a worker.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job: AnalyzeVideoJob,
    /// Lease attempts so far, including this one
    pub attempts: u32,
}

/// Per-user queue view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQueueStatus {
    /// The user's active job, if a worker holds one
    pub active_job: Option<JobId>,
    /// The user's waiting jobs with their 1-based queue positions
    pub waiting: Vec<WaitingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingEntry {
    pub job_id: JobId,
    pub position: usize,
}

/// Counts by state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.queue_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn job_key(job_id: &JobId) -> String {
        format!("job:{}", job_id)
    }

    /// Submit a job. Rejects with [`QueueError::QueueFull`] when the waiting
    /// list is at capacity and with [`QueueError::DuplicateJob`] when an
    /// identical submission is already queued or running.
    pub async fn submit(&self, job: AnalyzeVideoJob) -> QueueResult<SubmitReceipt> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let waiting: usize = conn.llen(WAITING_LIST).await?;
        if waiting >= self.config.max_waiting {
            warn!(
                waiting,
                max = self.config.max_waiting,
                "Rejecting submission, queue full"
            );
            return Err(QueueError::QueueFull {
                max: self.config.max_waiting,
            });
        }

        let dedup_key = format!("dedup:{}", job.idempotency_key());
        let acquired: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(job.job_id.as_str())
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs())
            .query_async(&mut conn)
            .await
            .unwrap_or(false);
        if !acquired {
            warn!(key = %dedup_key, "Duplicate submission rejected");
            return Err(QueueError::DuplicateJob);
        }

        let job_id = job.job_id.clone();
        let record = JobRecord::new(job);
        self.save_record(&mut conn, &record).await?;

        let position: usize = conn.rpush(WAITING_LIST, job_id.as_str()).await?;

        info!(job_id = %job_id, position, "Enqueued job");
        Ok(SubmitReceipt { job_id, position })
    }

    /// Lease the next waiting job, blocking up to `block` for one to appear.
    ///
    /// Returns `None` on timeout. The move from waiting to active is a
    /// single atomic `BLMOVE`, so at most one worker can lease a given job.
    pub async fn lease(&self, consumer: &str, block: Duration) -> QueueResult<Option<LeasedJob>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Promote any delayed retries that have become due.
        self.promote_due(&mut conn).await?;

        let moved: Option<String> = redis::cmd("BLMOVE")
            .arg(WAITING_LIST)
            .arg(ACTIVE_LIST)
            .arg("LEFT")
            .arg("RIGHT")
            .arg(block.as_secs_f64())
            .query_async(&mut conn)
            .await?;

        let Some(id) = moved else {
            return Ok(None);
        };

        let job_id = JobId::from_string(id);
        let mut record = self.load_record(&mut conn, &job_id).await?;
        record.lease(consumer);
        self.save_record(&mut conn, &record).await?;

        debug!(job_id = %job_id, consumer, attempts = record.attempts, "Leased job");
        Ok(Some(LeasedJob {
            job: record.job,
            attempts: record.attempts,
        }))
    }

    /// Refresh the lease stamp of an active job so the stale sweeper leaves
    /// it alone while the worker is still making progress.
    pub async fn heartbeat(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut record = self.load_record(&mut conn, job_id).await?;
        if record.state == JobState::Active {
            record.lease_at = Some(Utc::now());
            self.save_record(&mut conn, &record).await?;
        }
        Ok(())
    }

    /// Terminal success acknowledgement.
    pub async fn ack_success(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let mut record = self.load_record(&mut conn, job_id).await?;
        record.state = JobState::Succeeded;
        record.consumer = None;
        record.finished_at = Some(Utc::now());
        self.save_record(&mut conn, &record).await?;

        let _: () = conn.lrem(ACTIVE_LIST, 0, job_id.as_str()).await?;
        let _: () = conn.rpush(SUCCEEDED_LIST, job_id.as_str()).await?;
        self.finish_record(&mut conn, &record).await?;

        // The guard only covers queued/active jobs; a finished file may be
        // submitted again.
        let dedup_key = format!("dedup:{}", record.job.idempotency_key());
        let _: () = conn.del(&dedup_key).await.unwrap_or(());

        info!(job_id = %job_id, "Job succeeded");
        Ok(())
    }

    /// Terminal or retriable failure acknowledgement.
    ///
    /// A retriable failure below the attempt cap goes back through
    /// `queue:delayed` with exponential backoff; anything else lands in
    /// `queue:failed`.
    pub async fn ack_failure(
        &self,
        job_id: &JobId,
        error: &str,
        retriable: bool,
    ) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let mut record = self.load_record(&mut conn, job_id).await?;
        let _: () = conn.lrem(ACTIVE_LIST, 0, job_id.as_str()).await?;

        if retriable && record.attempts < self.config.max_attempts {
            let delay = self.retry_delay(record.attempts);
            let visible_at = Utc::now().timestamp() + delay.as_secs() as i64;

            record.requeue();
            record.error = Some(error.to_string());
            self.save_record(&mut conn, &record).await?;

            let _: () = conn.zadd(DELAYED_SET, job_id.as_str(), visible_at).await?;

            info!(
                job_id = %job_id,
                attempt = record.attempts,
                max = self.config.max_attempts,
                delay_secs = delay.as_secs(),
                "Job failed, retry scheduled"
            );
        } else {
            record.state = JobState::Failed;
            record.consumer = None;
            record.error = Some(error.to_string());
            record.finished_at = Some(Utc::now());
            self.save_record(&mut conn, &record).await?;

            let _: () = conn.rpush(FAILED_LIST, job_id.as_str()).await?;
            self.finish_record(&mut conn, &record).await?;

            // The job is no longer queued or active, so the guard lifts
            // and the same file may be submitted again.
            let dedup_key = format!("dedup:{}", record.job.idempotency_key());
            let _: () = conn.del(&dedup_key).await.unwrap_or(());

            warn!(job_id = %job_id, attempts = record.attempts, error, "Job failed terminally");
        }

        Ok(())
    }

    /// Mark a job cancelled. The worker still publishes the terminal event.
    pub async fn ack_cancelled(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let mut record = self.load_record(&mut conn, job_id).await?;
        record.state = JobState::Cancelled;
        record.consumer = None;
        record.finished_at = Some(Utc::now());
        self.save_record(&mut conn, &record).await?;

        let _: () = conn.lrem(ACTIVE_LIST, 0, job_id.as_str()).await?;
        let _: () = conn.lrem(WAITING_LIST, 0, job_id.as_str()).await?;
        let _: () = conn.rpush(FAILED_LIST, job_id.as_str()).await?;
        self.finish_record(&mut conn, &record).await?;

        let dedup_key = format!("dedup:{}", record.job.idempotency_key());
        let _: () = conn.del(&dedup_key).await.unwrap_or(());

        info!(job_id = %job_id, "Job cancelled");
        Ok(())
    }

    /// Return stale active jobs to the waiting list.
    ///
    /// Covers worker crashes: exactly-one-lease is restored because the dead
    /// worker's entry is removed from `queue:active` before the re-push.
    pub async fn sweep_stale(&self) -> QueueResult<usize> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let active_ids: Vec<String> = conn.lrange(ACTIVE_LIST, 0, -1).await?;
        let timeout_secs = self.config.lease_timeout.as_secs() as i64;
        let mut reclaimed = 0usize;

        for id in active_ids {
            let job_id = JobId::from_string(&id);
            let record = match self.load_record(&mut conn, &job_id).await {
                Ok(r) => r,
                Err(QueueError::JobNotFound(_)) => {
                    // Orphaned list entry; drop it.
                    let _: () = conn.lrem(ACTIVE_LIST, 0, &id).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !record.lease_is_stale(timeout_secs) {
                continue;
            }

            let removed: usize = conn.lrem(ACTIVE_LIST, 0, &id).await?;
            if removed == 0 {
                continue;
            }

            let mut record = record;
            record.requeue();
            self.save_record(&mut conn, &record).await?;
            let _: () = conn.rpush(WAITING_LIST, &id).await?;

            warn!(job_id = %id, "Reclaimed stale lease");
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    /// Per-user queue view: the active job plus waiting positions.
    pub async fn status(&self, submitter_id: &str) -> QueueResult<UserQueueStatus> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let mut active_job = None;
        let active_ids: Vec<String> = conn.lrange(ACTIVE_LIST, 0, -1).await?;
        for id in active_ids {
            let job_id = JobId::from_string(&id);
            if let Ok(record) = self.load_record(&mut conn, &job_id).await {
                if record.job.submitter_id == submitter_id {
                    active_job = Some(job_id);
                    break;
                }
            }
        }

        let mut waiting = Vec::new();
        let waiting_ids: Vec<String> = conn.lrange(WAITING_LIST, 0, -1).await?;
        for (idx, id) in waiting_ids.iter().enumerate() {
            let job_id = JobId::from_string(id);
            if let Ok(record) = self.load_record(&mut conn, &job_id).await {
                if record.job.submitter_id == submitter_id {
                    waiting.push(WaitingEntry {
                        job_id,
                        position: idx + 1,
                    });
                }
            }
        }

        Ok(UserQueueStatus {
            active_job,
            waiting,
        })
    }

    /// Counts by state.
    pub async fn queue_stats(&self) -> QueueResult<QueueStats> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Ok(QueueStats {
            waiting: conn.llen(WAITING_LIST).await?,
            active: conn.llen(ACTIVE_LIST).await?,
            delayed: conn.zcard(DELAYED_SET).await?,
            succeeded: conn.llen(SUCCEEDED_LIST).await?,
            failed: conn.llen(FAILED_LIST).await?,
        })
    }

    /// Load a job record.
    pub async fn get_record(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        self.load_record(&mut conn, job_id).await
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let delay = self
            .config
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.config.retry_max_delay)
    }

    /// Move due delayed retries back to the waiting list.
    async fn promote_due(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> QueueResult<usize> {
        let now = Utc::now().timestamp();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(DELAYED_SET)
            .arg("-inf")
            .arg(now)
            .query_async(conn)
            .await?;

        let mut promoted = 0usize;
        for id in due {
            let removed: usize = conn.zrem(DELAYED_SET, &id).await?;
            if removed == 0 {
                // Another process promoted it first.
                continue;
            }
            let _: () = conn.rpush(WAITING_LIST, &id).await?;
            promoted += 1;
        }

        if promoted > 0 {
            info!(count = promoted, "Promoted delayed retries to waiting");
        }
        Ok(promoted)
    }

    async fn load_record(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job_id: &JobId,
    ) -> QueueResult<JobRecord> {
        let raw: Option<String> = conn.get(Self::job_key(job_id)).await?;
        let raw = raw.ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn save_record(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        record: &JobRecord,
    ) -> QueueResult<()> {
        let payload = serde_json::to_string(record)?;
        let _: () = conn.set(Self::job_key(&record.job.job_id), payload).await?;
        Ok(())
    }

    /// Retention housekeeping for a newly-terminal record: bounded history
    /// lists plus a TTL on the record itself.
    async fn finish_record(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        record: &JobRecord,
    ) -> QueueResult<()> {
        let _: () = conn
            .expire(
                Self::job_key(&record.job.job_id),
                TERMINAL_RECORD_TTL_SECS,
            )
            .await?;
        let _: () = conn.ltrim(SUCCEEDED_LIST, -SUCCEEDED_RETAIN, -1).await?;
        let _: () = conn.ltrim(FAILED_LIST, -FAILED_RETAIN, -1).await?;
        Ok(())
    }
}
