//! Job executor: leases jobs from the queue and runs them one at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use vidsum_gemini::CredentialPool;
use vidsum_queue::{JobQueue, LeasedJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::processor::{cleanup_job_files, process_job, ProcessingContext};
use crate::retry::with_backoff;

/// How long one `lease` call blocks before the loop re-checks shutdown.
const LEASE_BLOCK: Duration = Duration::from_secs(5);

/// Job executor. One leased job at a time per executor; run several worker
/// processes for cross-job parallelism.
pub struct JobExecutor {
    ctx: Arc<ProcessingContext>,
    consumer_name: String,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<JobQueue>,
        pool: Arc<CredentialPool>,
    ) -> WorkerResult<Self> {
        let ctx = Arc::new(ProcessingContext::new(config, queue, pool)?);
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Ok(Self {
            ctx,
            consumer_name,
            shutdown,
        })
    }

    /// Start the executor. Returns when a shutdown signal has been
    /// received and the in-flight job (if any) has finished.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(consumer = %self.consumer_name, "Starting job executor");

        tokio::fs::create_dir_all(&self.ctx.config.temp_video_dir).await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        // Periodic stale-lease sweep for crashed workers.
        let sweeper = {
            let queue = Arc::clone(&self.ctx.queue);
            let interval = self.ctx.config.sweep_interval;
            let mut shutdown_rx = self.shutdown.subscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        _ = ticker.tick() => {
                            match queue.sweep_stale().await {
                                Ok(0) => {}
                                Ok(n) => info!(reclaimed = n, "Stale-lease sweep"),
                                Err(e) => warn!(error = %e, "Stale-lease sweep failed"),
                            }
                        }
                    }
                }
            })
        };

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                leased = self.ctx.queue.lease(&self.consumer_name, LEASE_BLOCK) => {
                    match leased {
                        Ok(Some(job)) => self.execute_job(job).await,
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "Lease failed, backing off");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        sweeper.abort();
        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run one leased job with heartbeat, deadline, terminal event, and
    /// cleanup.
    async fn execute_job(&self, leased: LeasedJob) {
        let job = leased.job;
        let job_id = job.job_id.clone();
        info!(job_id = %job_id, file = %job.display_name, "Executing job");

        let cancel = CancellationToken::new();

        // Refresh the lease while the job runs so the sweeper does not
        // reclaim it mid-flight.
        let heartbeat = {
            let queue = Arc::clone(&self.ctx.queue);
            let job_id = job_id.clone();
            let interval = self.ctx.config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let result = with_backoff(
                        "lease_heartbeat",
                        3,
                        Duration::from_millis(200),
                        || queue.heartbeat(&job_id),
                    )
                    .await;
                    if let Err(e) = result {
                        warn!(job_id = %job_id, error = %e, "Lease heartbeat failed");
                    }
                }
            })
        };

        // A shutdown signal cancels the in-flight job cooperatively.
        let shutdown_guard = {
            let cancel = cancel.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                    if *shutdown_rx.borrow() {
                        cancel.cancel();
                        break;
                    }
                }
            })
        };

        let deadline = self.ctx.config.job_deadline;
        let result = match tokio::time::timeout(
            deadline,
            process_job(&self.ctx, &job, &cancel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(WorkerError::job_failed(format!(
                    "processing exceeded the {}s deadline",
                    deadline.as_secs()
                )))
            }
        };

        heartbeat.abort();
        shutdown_guard.abort();

        match result {
            Ok(()) => {
                if let Err(e) = self.ctx.queue.ack_success(&job_id).await {
                    error!(job_id = %job_id, error = %e, "Failed to ack success");
                }
                cleanup_job_files(&job).await;
            }
            Err(e) => {
                let message = e.user_message();
                let retriable = e.is_retryable();
                let will_retry =
                    retriable && leased.attempts < self.ctx.queue.config().max_attempts;
                error!(job_id = %job_id, error = %e, retriable, will_retry, "Job failed");

                // At most one terminal event per job: hold the error event
                // back while a retry is still scheduled.
                if !will_retry {
                    if let Err(publish_err) =
                        self.ctx.progress.error(&job_id, message.clone()).await
                    {
                        warn!(job_id = %job_id, error = %publish_err, "Failed to publish error event");
                    }
                }

                let ack = if e.is_cancelled() {
                    self.ctx.queue.ack_cancelled(&job_id).await
                } else {
                    self.ctx.queue.ack_failure(&job_id, &message, retriable).await
                };
                if let Err(ack_err) = ack {
                    error!(job_id = %job_id, error = %ack_err, "Failed to ack failure");
                }

                // The retry attempt reads the same source path; only a
                // terminal failure releases it.
                if !will_retry {
                    cleanup_job_files(&job).await;
                }
            }
        }
    }
}
