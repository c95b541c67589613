//! Progress events via Redis Pub/Sub.
//!
//! One channel per job, single writer (the worker holding the lease). The
//! latest snapshot is also cached under `progress:last:{job_id}` so status
//! queries and late subscribers see the current stage immediately.

use redis::AsyncCommands;
use tracing::debug;

use vidsum_models::{JobEvent, JobId, JobProgress, MergedArtifact};

use crate::error::QueueResult;

/// TTL for the cached last snapshot.
const LAST_SNAPSHOT_TTL_SECS: i64 = 3600;

/// Channel for publishing/subscribing to progress events.
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(queue_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(queue_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("progress:{}", job_id)
    }

    fn last_key(job_id: &JobId) -> String {
        format!("progress:last:{}", job_id)
    }

    /// Publish an event on the job's channel and cache it as the latest
    /// snapshot.
    pub async fn publish(&self, event: &JobEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(event.job_id());
        let payload = serde_json::to_string(event)?;

        debug!(channel = %channel, "Publishing job event");
        let _: () = conn.publish(&channel, &payload).await?;
        let _: () = redis::cmd("SET")
            .arg(Self::last_key(event.job_id()))
            .arg(&payload)
            .arg("EX")
            .arg(LAST_SNAPSHOT_TTL_SECS)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    /// Publish a progress snapshot.
    pub async fn progress(&self, job_id: &JobId, progress: &JobProgress) -> QueueResult<()> {
        self.publish(&JobEvent::progress(job_id, progress)).await
    }

    /// Publish the terminal result event.
    pub async fn result(&self, job_id: &JobId, artifact: MergedArtifact) -> QueueResult<()> {
        self.publish(&JobEvent::result(job_id, artifact)).await
    }

    /// Publish the terminal error event.
    pub async fn error(&self, job_id: &JobId, message: impl Into<String>) -> QueueResult<()> {
        self.publish(&JobEvent::error(job_id, message)).await
    }

    /// Read the latest cached event for a job, if any.
    pub async fn last(&self, job_id: &JobId) -> QueueResult<Option<JobEvent>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(Self::last_key(job_id)).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Subscribe to events for a job.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = JobEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(job_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}
