//! Job processing pipeline.
//!
//! A leased job flows through: input validation, one upload per pool
//! credential, chunk planning, parallel analysis, merge, optional trim,
//! terminal result event. Progress lands on the job's channel with
//! monotonic `(stage, percent)` snapshots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vidsum_gemini::{
    CredentialPool, FileRef, FileUploader, GenerateClient, UploadConfig,
};
use vidsum_models::chunk::ChunkPlan;
use vidsum_models::{AnalyzeVideoJob, JobId, JobProgress, JobStage};
use vidsum_queue::{JobQueue, ProgressChannel};

use crate::config::{WorkerConfig, MAX_FILE_SIZE_BYTES};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::merger::{self, MergeStats};
use crate::scheduler::{ChunkScheduler, SchedulerHooks};
use crate::trimmer::FfmpegTrimmer;

/// Progress bands per stage: uploads fill [10, 40], analysis fills
/// [42, 90]; merge lands at 92, trim at 95, complete at 100.
const UPLOAD_BAND: (u8, u8) = (10, 40);
const ANALYZE_BAND: (u8, u8) = (42, 90);

/// Shared context for job processing.
pub struct ProcessingContext {
    pub config: WorkerConfig,
    pub queue: Arc<JobQueue>,
    pub progress: Arc<ProgressChannel>,
    pub pool: Arc<CredentialPool>,
    pub uploader: Arc<FileUploader>,
    pub scheduler: ChunkScheduler,
    pub trimmer: FfmpegTrimmer,
}

impl ProcessingContext {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<JobQueue>,
        pool: Arc<CredentialPool>,
    ) -> WorkerResult<Self> {
        let progress = Arc::new(
            ProgressChannel::new(&queue.config().queue_url)
                .map_err(WorkerError::Queue)?,
        );
        let uploader = Arc::new(FileUploader::new(UploadConfig::default())?);
        let client = Arc::new(GenerateClient::with_defaults()?);
        let scheduler = ChunkScheduler::new(Arc::clone(&pool), client);

        Ok(Self {
            config,
            queue,
            progress,
            pool,
            uploader,
            scheduler,
            trimmer: FfmpegTrimmer::default(),
        })
    }
}

/// Monotonic progress sink: snapshots that would move `(stage, percent)`
/// backwards are dropped instead of published.
pub struct ProgressSink {
    channel: Arc<ProgressChannel>,
    job_id: JobId,
    last: tokio::sync::Mutex<(u8, u8)>,
}

impl ProgressSink {
    pub fn new(channel: Arc<ProgressChannel>, job_id: JobId) -> Self {
        Self {
            channel,
            job_id,
            last: tokio::sync::Mutex::new((0, 0)),
        }
    }

    pub async fn publish(&self, stage: JobStage, percent: u8, message: impl Into<String>) {
        self.publish_with_eta(stage, percent, message, None).await;
    }

    pub async fn publish_with_eta(
        &self,
        stage: JobStage,
        percent: u8,
        message: impl Into<String>,
        eta_seconds: Option<u64>,
    ) {
        let key = (stage.rank(), percent.min(100));
        {
            let mut last = self.last.lock().await;
            if stage != JobStage::Error && key < *last {
                return;
            }
            *last = key;
        }

        let mut progress = JobProgress::new(stage, percent, message);
        progress.eta_seconds = eta_seconds;
        if let Err(e) = self.channel.progress(&self.job_id, &progress).await {
            warn!(job_id = %self.job_id, error = %e, "Failed to publish progress");
        }
    }
}

/// Process one leased job end to end. The caller handles terminal
/// acknowledgement, the error event, and source cleanup.
pub async fn process_job(
    ctx: &ProcessingContext,
    job: &AnalyzeVideoJob,
    cancel: &CancellationToken,
) -> WorkerResult<()> {
    let logger = JobLogger::new(&job.job_id);
    let started = Instant::now();
    logger.start(&format!(
        "{} ({} MB)",
        job.display_name,
        job.size_bytes / (1024 * 1024)
    ));

    let size_bytes = validate_input(job).await?;
    let sink = Arc::new(ProgressSink::new(
        Arc::clone(&ctx.progress),
        job.job_id.clone(),
    ));

    // Uploads: one per credential so the scheduler can fan chunks out
    // across the whole pool. The file reference is scoped to the
    // credential that uploaded it.
    sink.publish(
        JobStage::Uploading,
        UPLOAD_BAND.0,
        format!("Uploading {} to the analysis service...", job.display_name),
    )
    .await;
    let file_refs = upload_per_credential(ctx, job, size_bytes, &sink, cancel).await?;
    sink.publish(JobStage::Uploading, UPLOAD_BAND.1, "Upload complete").await;

    // Plan.
    let plan = ChunkPlan::plan(
        size_bytes,
        ctx.config.chunk_target_s(),
        ctx.config.chunk_overlap_seconds,
    );
    logger.progress(&format!(
        "Planned {} chunk(s) over an estimated {}s",
        plan.len(),
        plan.estimated_duration_s
    ));

    // Parallel analysis, scheduler percent mapped into the analyze band.
    sink.publish(
        JobStage::Analyzing,
        ANALYZE_BAND.0,
        format!("Analyzing {} segment(s) in parallel...", plan.len()),
    )
    .await;
    let outcome = run_scheduler(ctx, job, &plan, &file_refs, &sink, cancel).await?;
    if outcome.cancelled {
        return Err(WorkerError::Cancelled);
    }

    // Merge.
    sink.publish(JobStage::Analyzing, 92, "Merging segment results...")
        .await;
    let mut merged = merger::merge(
        &outcome.results,
        MergeStats {
            successful_chunks: outcome.successful,
            failed_chunks: outcome.failed,
            model_id: job.model_id.clone(),
            processing_seconds: started.elapsed().as_secs(),
        },
    );

    // Trim, when the model marked content worth keeping.
    if !merged.content_metadata.main_content_timestamps.is_empty() {
        sink.publish(JobStage::Trimming, 95, "Trimming filler from the recording...")
            .await;
        let output = trimmed_output_path(&ctx.config.temp_video_dir, &job.job_id);
        match ctx
            .trimmer
            .trim(
                Path::new(&job.source_path),
                &merged.content_metadata.main_content_timestamps,
                &output,
            )
            .await
        {
            Ok(()) => {
                merged.processing_metadata.trimmed_output =
                    Some(output.display().to_string());
                schedule_grace_cleanup(output, ctx.config.cleanup_grace);
            }
            Err(e) => {
                // The analysis artifact stands on its own; a trim failure
                // costs only the trimmed rendition.
                logger.warning(&format!("Trim step failed: {}", e));
            }
        }
    }

    // Terminal result event, then the closing progress snapshot.
    ctx.progress
        .result(&job.job_id, merged)
        .await
        .map_err(WorkerError::Queue)?;
    sink.publish(JobStage::Complete, 100, "Analysis complete").await;

    logger.completion(&format!(
        "{} chunks ({} failed) in {}s",
        outcome.results.len(),
        outcome.failed,
        started.elapsed().as_secs()
    ));
    Ok(())
}

/// Reject unsupported input before any network work. Returns the real
/// on-disk size.
async fn validate_input(job: &AnalyzeVideoJob) -> WorkerResult<u64> {
    if !job.mime_type.starts_with("video/") {
        return Err(WorkerError::input_invalid(format!(
            "unsupported file type: {}",
            job.mime_type
        )));
    }

    let metadata = tokio::fs::metadata(&job.source_path)
        .await
        .map_err(|_| WorkerError::input_invalid("source file is missing"))?;

    let size = metadata.len();
    if size == 0 {
        return Err(WorkerError::input_invalid("source file is empty"));
    }
    if size > MAX_FILE_SIZE_BYTES {
        return Err(WorkerError::input_invalid(format!(
            "file is {} MB; the limit is {} MB",
            size / (1024 * 1024),
            MAX_FILE_SIZE_BYTES / (1024 * 1024)
        )));
    }
    Ok(size)
}

/// Upload the source once per pool credential, in parallel. Byte progress
/// of the first credential's upload is surfaced on the job channel.
async fn upload_per_credential(
    ctx: &ProcessingContext,
    job: &AnalyzeVideoJob,
    size_bytes: u64,
    sink: &Arc<ProgressSink>,
    cancel: &CancellationToken,
) -> WorkerResult<HashMap<usize, FileRef>> {
    let secrets = ctx.pool.secrets().await;
    info!(
        job_id = %job.job_id,
        credentials = secrets.len(),
        "Uploading source once per credential"
    );

    // Representative byte progress: the first credential's upload reports
    // through this channel; a background task maps it into the band.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(u64, u64)>();
    let publisher = {
        let sink = Arc::clone(sink);
        let name = job.display_name.clone();
        tokio::spawn(async move {
            let mut last_publish = Instant::now();
            while let Some((sent, total)) = rx.recv().await {
                if last_publish.elapsed() < Duration::from_secs(1) && sent < total {
                    continue;
                }
                last_publish = Instant::now();
                let span = (UPLOAD_BAND.1 - UPLOAD_BAND.0) as u64;
                let percent =
                    UPLOAD_BAND.0 + (span * sent / total.max(1)).min(span as u64) as u8;
                sink.publish(
                    JobStage::Uploading,
                    percent,
                    format!("Uploading {}...", name),
                )
                .await;
            }
        })
    };

    let source = Path::new(&job.source_path);
    let uploads = secrets.iter().enumerate().map(|(position, (id, secret))| {
        let tx = tx.clone();
        let uploader = Arc::clone(&ctx.uploader);
        async move {
            let report = move |sent: u64, total: u64| {
                let _ = tx.send((sent, total));
            };
            let progress: Option<&(dyn Fn(u64, u64) + Send + Sync)> = if position == 0 {
                Some(&report)
            } else {
                None
            };

            let file_ref = uploader
                .upload(
                    secret,
                    source,
                    &job.mime_type,
                    &job.display_name,
                    cancel,
                    progress,
                )
                .await?;
            uploader
                .wait_ready(secret, &file_ref.name, size_bytes, cancel)
                .await?;
            Ok::<(usize, FileRef), WorkerError>((*id, file_ref))
        }
    });

    let results = join_all(uploads).await;
    drop(tx);
    publisher.abort();

    let mut file_refs = HashMap::new();
    for result in results {
        let (id, file_ref) = result?;
        file_refs.insert(id, file_ref);
    }
    Ok(file_refs)
}

async fn run_scheduler(
    ctx: &ProcessingContext,
    job: &AnalyzeVideoJob,
    plan: &ChunkPlan,
    file_refs: &HashMap<usize, FileRef>,
    sink: &Arc<ProgressSink>,
    cancel: &CancellationToken,
) -> WorkerResult<crate::scheduler::ChunkOutcome> {
    // Scheduler callbacks are synchronous; a relay task owns the async
    // publishing.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(u8, Option<u64>, String)>();
    let relay = {
        let sink = Arc::clone(sink);
        tokio::spawn(async move {
            while let Some((percent, eta, message)) = rx.recv().await {
                sink.publish_with_eta(JobStage::Analyzing, percent, message, eta)
                    .await;
            }
        })
    };

    let on_progress = move |snapshot: crate::scheduler::ParallelProgress| {
        let span = (ANALYZE_BAND.1 - ANALYZE_BAND.0) as u32;
        let percent =
            ANALYZE_BAND.0 + (span * snapshot.overall_percent as u32 / 100).min(span) as u8;
        let message = format!(
            "Analyzed {}/{} segments ({} active, {} failed)",
            snapshot.completed + snapshot.failed,
            snapshot.total,
            snapshot.active,
            snapshot.failed
        );
        let _ = tx.send((percent, snapshot.eta_seconds, message));
    };

    let outcome = ctx
        .scheduler
        .run(
            plan,
            file_refs,
            &job.mime_type,
            &job.model_id,
            ctx.config.max_concurrent_chunks,
            cancel,
            SchedulerHooks::progress_only(&on_progress),
        )
        .await;

    relay.abort();
    outcome
}

fn trimmed_output_path(temp_dir: &Path, job_id: &JobId) -> PathBuf {
    temp_dir.join(format!("{}_trimmed.mp4", job_id))
}

/// Delete `path` after a grace period, letting any downstream consumer
/// pick the file up first.
fn schedule_grace_cleanup(path: PathBuf, grace: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "Grace cleanup failed");
        }
    });
}

/// Remove a job's local files. Used on every terminal path.
pub async fn cleanup_job_files(job: &AnalyzeVideoJob) {
    if let Err(e) = tokio::fs::remove_file(&job.source_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(
                job_id = %job.job_id,
                path = %job.source_path,
                error = %e,
                "Failed to remove source file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_mapping_stays_inside_bounds() {
        for (band, input, expected) in [
            (ANALYZE_BAND, 0u32, 42u8),
            (ANALYZE_BAND, 50, 66),
            (ANALYZE_BAND, 100, 90),
        ] {
            let span = (band.1 - band.0) as u32;
            let mapped = band.0 + (span * input / 100).min(span) as u8;
            assert_eq!(mapped, expected);
        }
    }

    #[test]
    fn trimmed_path_is_job_scoped() {
        let path = trimmed_output_path(Path::new("/tmp/vidsum"), &JobId::from_string("abc"));
        assert_eq!(path, PathBuf::from("/tmp/vidsum/abc_trimmed.mp4"));
    }

    #[tokio::test]
    async fn validate_rejects_bad_mime() {
        let job = AnalyzeVideoJob::new(
            "/nonexistent.pdf",
            "doc.pdf",
            "application/pdf",
            100,
            "gemini-2.5-flash",
            "u1",
        );
        assert!(matches!(
            validate_input(&job).await,
            Err(WorkerError::InputInvalid(_))
        ));
    }

    #[tokio::test]
    async fn validate_rejects_missing_file() {
        let job = AnalyzeVideoJob::new(
            "/definitely/not/here.mp4",
            "v.mp4",
            "video/mp4",
            100,
            "gemini-2.5-flash",
            "u1",
        );
        assert!(matches!(
            validate_input(&job).await,
            Err(WorkerError::InputInvalid(_))
        ));
    }
}
