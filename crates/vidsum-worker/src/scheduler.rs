//! Parallel chunk scheduler.
//!
//! Fans chunk analyses out across the credential pool with bounded
//! concurrency, streams progress snapshots, retries rate-limited and
//! transient chunk failures once within the job, and substitutes a
//! placeholder analysis for chunks that still fail so the merger always
//! sees a dense index range.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vidsum_gemini::{
    build_chunk_prompt, CredentialPool, FileRef, GeminiError, GenerateClient, PoolStatus,
};
use vidsum_models::chunk::{Chunk, ChunkPlan};
use vidsum_models::{ChunkAnalysis, ChunkResult};

use crate::error::{WorkerError, WorkerResult};

/// Minimum interval between non-forced progress emissions.
const EMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Runtime status of one chunk task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkTaskStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Failed,
}

/// Per-chunk slice of a progress snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkTaskSnapshot {
    pub index: usize,
    pub status: ChunkTaskStatus,
    /// 0.0 - 1.0
    pub progress: f32,
    /// Milliseconds the task has been (or was) running
    pub elapsed_ms: Option<u64>,
}

/// Aggregate snapshot emitted after task transitions, at most ~1 Hz.
#[derive(Debug, Clone, Serialize)]
pub struct ParallelProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub active: usize,
    pub overall_percent: u8,
    pub per_chunk: Vec<ChunkTaskSnapshot>,
    pub eta_seconds: Option<u64>,
    pub pool: PoolStatus,
}

/// Scheduler callbacks. `on_progress` is required; the chunk-level hooks
/// are optional.
pub struct SchedulerHooks<'a> {
    pub on_progress: &'a (dyn Fn(ParallelProgress) + Send + Sync),
    pub on_chunk_complete: Option<&'a (dyn Fn(&ChunkResult) + Send + Sync)>,
    pub on_chunk_error: Option<&'a (dyn Fn(usize, &GeminiError) + Send + Sync)>,
}

impl<'a> SchedulerHooks<'a> {
    pub fn progress_only(on_progress: &'a (dyn Fn(ParallelProgress) + Send + Sync)) -> Self {
        Self {
            on_progress,
            on_chunk_complete: None,
            on_chunk_error: None,
        }
    }
}

/// What the scheduler returns to the worker.
#[derive(Debug)]
pub struct ChunkOutcome {
    /// One result per chunk, ordered by `chunk_index`; failures appear as
    /// placeholders
    pub results: Vec<ChunkResult>,
    pub successful: usize,
    pub failed: usize,
    /// Set when a cancel signal interrupted the fan-out
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
struct TaskState {
    status: ChunkTaskStatus,
    progress: f32,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
}

impl TaskState {
    fn new() -> Self {
        Self {
            status: ChunkTaskStatus::Pending,
            progress: 0.0,
            started_at: None,
            ended_at: None,
        }
    }

    fn effective_progress(&self) -> f32 {
        match self.status {
            ChunkTaskStatus::Completed | ChunkTaskStatus::Failed => 1.0,
            _ => self.progress,
        }
    }
}

struct Tracker {
    tasks: Mutex<Vec<TaskState>>,
    last_emit: Mutex<Instant>,
    started: Instant,
}

impl Tracker {
    fn new(total: usize) -> Self {
        Self {
            tasks: Mutex::new(vec![TaskState::new(); total]),
            last_emit: Mutex::new(
                Instant::now()
                    .checked_sub(EMIT_INTERVAL)
                    .unwrap_or_else(Instant::now),
            ),
            started: Instant::now(),
        }
    }

    fn mark_processing(&self, index: usize) {
        let mut tasks = self.tasks.lock().expect("tracker lock");
        let task = &mut tasks[index];
        task.status = ChunkTaskStatus::Processing;
        task.started_at = Some(Instant::now());
    }

    fn mark_done(&self, index: usize, ok: bool) {
        let mut tasks = self.tasks.lock().expect("tracker lock");
        let task = &mut tasks[index];
        task.status = if ok {
            ChunkTaskStatus::Completed
        } else {
            ChunkTaskStatus::Failed
        };
        task.progress = 1.0;
        task.ended_at = Some(Instant::now());
    }

    /// Return a snapshot, or `None` when inside the throttle window and not
    /// forced.
    fn snapshot(&self, pool: PoolStatus, force: bool) -> Option<ParallelProgress> {
        {
            let mut last = self.last_emit.lock().expect("tracker lock");
            if !force && last.elapsed() < EMIT_INTERVAL {
                return None;
            }
            *last = Instant::now();
        }

        let tasks = self.tasks.lock().expect("tracker lock");
        let total = tasks.len();
        let mut completed = 0;
        let mut failed = 0;
        let mut active = 0;
        let mut progress_sum = 0.0f32;

        let per_chunk = tasks
            .iter()
            .enumerate()
            .map(|(index, task)| {
                match task.status {
                    ChunkTaskStatus::Completed => completed += 1,
                    ChunkTaskStatus::Failed => failed += 1,
                    ChunkTaskStatus::Processing | ChunkTaskStatus::Uploading => active += 1,
                    ChunkTaskStatus::Pending => {}
                }
                progress_sum += task.effective_progress();
                let elapsed_ms = task.started_at.map(|started| {
                    task.ended_at
                        .unwrap_or_else(Instant::now)
                        .duration_since(started)
                        .as_millis() as u64
                });
                ChunkTaskSnapshot {
                    index,
                    status: task.status,
                    progress: task.effective_progress(),
                    elapsed_ms,
                }
            })
            .collect();

        let overall_percent = if total == 0 {
            100
        } else {
            ((100.0 * progress_sum / total as f32).round() as u8).min(100)
        };

        let processed = completed + failed;
        let eta_seconds = if processed > 0 && processed < total {
            let elapsed = self.started.elapsed().as_secs_f64();
            let remaining = (total - processed) as f64;
            Some((elapsed * remaining / processed as f64).round() as u64)
        } else {
            None
        };

        Some(ParallelProgress {
            total,
            completed,
            failed,
            active,
            overall_percent,
            per_chunk,
            eta_seconds,
            pool,
        })
    }
}

/// The one call the scheduler makes per chunk. Implemented by
/// [`GenerateClient`]; tests substitute a stub.
pub trait ChunkAnalyzer: Send + Sync {
    fn analyze(
        &self,
        credential: &str,
        model_id: &str,
        file: &FileRef,
        mime_type: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<ChunkAnalysis, GeminiError>> + Send;
}

impl ChunkAnalyzer for GenerateClient {
    async fn analyze(
        &self,
        credential: &str,
        model_id: &str,
        file: &FileRef,
        mime_type: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ChunkAnalysis, GeminiError> {
        self.generate(credential, model_id, file, mime_type, prompt, cancel)
            .await
    }
}

/// Drives analysis of a chunk plan across the credential pool.
pub struct ChunkScheduler<A: ChunkAnalyzer = GenerateClient> {
    pool: Arc<CredentialPool>,
    client: Arc<A>,
}

impl<A: ChunkAnalyzer> ChunkScheduler<A> {
    pub fn new(pool: Arc<CredentialPool>, client: Arc<A>) -> Self {
        Self { pool, client }
    }

    /// Analyze every chunk of `plan`, one generate call per chunk.
    ///
    /// `file_refs` maps credential index to that credential's uploaded
    /// file. Chunks that fail with a rate-limit, transient, or
    /// parse error get exactly one more attempt; whatever still fails
    /// becomes a placeholder. A context-window signal aborts the job.
    pub async fn run(
        &self,
        plan: &ChunkPlan,
        file_refs: &HashMap<usize, FileRef>,
        mime_type: &str,
        model_id: &str,
        max_concurrency: usize,
        cancel: &CancellationToken,
        hooks: SchedulerHooks<'_>,
    ) -> WorkerResult<ChunkOutcome> {
        let total = plan.len();
        let bound = self
            .pool
            .max_concurrency()
            .min(total)
            .min(max_concurrency.max(1))
            .max(1);

        info!(
            chunks = total,
            concurrency = bound,
            model_id,
            "Starting parallel chunk analysis"
        );

        let tracker = Tracker::new(total);
        self.emit(&tracker, &hooks, true).await;

        // First pass over every chunk.
        let first = self
            .run_pass(
                plan.chunks.clone(),
                total,
                file_refs,
                mime_type,
                model_id,
                bound,
                cancel,
                &tracker,
                &hooks,
            )
            .await;

        // One in-job retry for chunks that failed in a recoverable way.
        let mut outcomes: HashMap<usize, Result<ChunkAnalysis, GeminiError>> = HashMap::new();
        let mut retry_chunks = Vec::new();
        for (chunk, result) in plan.chunks.iter().zip(first) {
            match &result {
                Err(e) if chunk_is_retriable(e) && !cancel.is_cancelled() => {
                    debug!(chunk = chunk.index, error = %e, "Chunk failed, scheduling retry");
                    retry_chunks.push(*chunk);
                }
                _ => {}
            }
            outcomes.insert(chunk.index, result);
        }

        if !retry_chunks.is_empty() {
            warn!(count = retry_chunks.len(), "Retrying failed chunks once");
            let second = self
                .run_pass(
                    retry_chunks.clone(),
                    total,
                    file_refs,
                    mime_type,
                    model_id,
                    bound,
                    cancel,
                    &tracker,
                    &hooks,
                )
                .await;
            for (chunk, result) in retry_chunks.iter().zip(second) {
                outcomes.insert(chunk.index, result);
            }
        }

        // A context-window breach is a job-level failure, not a chunk one.
        for result in outcomes.values() {
            if let Err(GeminiError::ContextExceeded(msg)) = result {
                return Err(WorkerError::Gemini(GeminiError::ContextExceeded(
                    msg.clone(),
                )));
            }
        }

        // Fold into dense, index-ordered results with placeholders.
        let mut results = Vec::with_capacity(total);
        let mut successful = 0;
        let mut failed = 0;
        for chunk in &plan.chunks {
            let outcome = outcomes
                .remove(&chunk.index)
                .unwrap_or(Err(GeminiError::Cancelled));
            match outcome {
                Ok(analysis) => {
                    successful += 1;
                    let result = ChunkResult {
                        chunk_index: chunk.index,
                        chunk_start_offset_s: chunk.start_s,
                        analysis,
                    };
                    if let Some(on_complete) = hooks.on_chunk_complete {
                        on_complete(&result);
                    }
                    results.push(result);
                }
                Err(error) => {
                    failed += 1;
                    if let Some(on_error) = hooks.on_chunk_error {
                        on_error(chunk.index, &error);
                    }
                    results.push(ChunkResult {
                        chunk_index: chunk.index,
                        chunk_start_offset_s: chunk.start_s,
                        analysis: ChunkAnalysis::placeholder(
                            chunk.start_s,
                            chunk.end_s,
                            &error.to_string(),
                        ),
                    });
                }
            }
        }

        self.emit(&tracker, &hooks, true).await;

        let cancelled = cancel.is_cancelled();
        info!(successful, failed, cancelled, "Chunk analysis finished");

        Ok(ChunkOutcome {
            results,
            successful,
            failed,
            cancelled,
        })
    }

    /// Run one batch of chunks through the pool; results align with the
    /// input order.
    #[allow(clippy::too_many_arguments)]
    async fn run_pass(
        &self,
        chunks: Vec<Chunk>,
        total_chunks: usize,
        file_refs: &HashMap<usize, FileRef>,
        mime_type: &str,
        model_id: &str,
        bound: usize,
        cancel: &CancellationToken,
        tracker: &Tracker,
        hooks: &SchedulerHooks<'_>,
    ) -> Vec<Result<ChunkAnalysis, GeminiError>> {
        let units: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                move |cred: vidsum_gemini::PooledCredential| async move {
                    if cancel.is_cancelled() {
                        return Err(GeminiError::Cancelled);
                    }

                    tracker.mark_processing(chunk.index);
                    self.emit(tracker, hooks, false).await;

                    let file = file_refs.get(&cred.id).ok_or_else(|| {
                        GeminiError::Terminal(format!(
                            "no uploaded file for credential {}",
                            cred.id
                        ))
                    })?;
                    let prompt = build_chunk_prompt(&chunk, total_chunks);

                    let result = self
                        .client
                        .analyze(&cred.secret, model_id, file, mime_type, &prompt, cancel)
                        .await;

                    tracker.mark_done(chunk.index, result.is_ok());
                    self.emit(tracker, hooks, false).await;
                    result
                }
            })
            .collect();

        self.pool.run_with_all(units, Some(bound)).await
    }

    async fn emit(&self, tracker: &Tracker, hooks: &SchedulerHooks<'_>, force: bool) {
        let pool = self.pool.status().await;
        if let Some(snapshot) = tracker.snapshot(pool, force) {
            (hooks.on_progress)(snapshot);
        }
    }
}

/// Chunk-level failures worth a single in-job retry: rate limits (after
/// the pool's cooldown bookkeeping), transient transport trouble, and
/// unparseable output.
fn chunk_is_retriable(error: &GeminiError) -> bool {
    matches!(
        error,
        GeminiError::RateLimited(_)
            | GeminiError::Transient(_)
            | GeminiError::BadJson(_)
            | GeminiError::NoCapacity
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_chunk_errors() {
        assert!(chunk_is_retriable(&GeminiError::RateLimited("429".into())));
        assert!(chunk_is_retriable(&GeminiError::Transient("503".into())));
        assert!(chunk_is_retriable(&GeminiError::BadJson("truncated".into())));
        assert!(!chunk_is_retriable(&GeminiError::Terminal("400".into())));
        assert!(!chunk_is_retriable(&GeminiError::Cancelled));
        assert!(!chunk_is_retriable(&GeminiError::ContextExceeded(
            "too big".into()
        )));
    }

    #[test]
    fn tracker_percent_and_eta() {
        let tracker = Tracker::new(4);
        tracker.mark_processing(0);
        tracker.mark_done(0, true);
        tracker.mark_processing(1);
        tracker.mark_done(1, false);

        let snapshot = tracker.snapshot(PoolStatus::default(), true).unwrap();
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        // Failed counts as fully processed for percent purposes.
        assert_eq!(snapshot.overall_percent, 50);
        assert!(snapshot.eta_seconds.is_some());
    }

    #[test]
    fn tracker_throttles_unforced_snapshots() {
        let tracker = Tracker::new(1);
        assert!(tracker.snapshot(PoolStatus::default(), true).is_some());
        // Inside the 1 Hz window an unforced snapshot is suppressed.
        assert!(tracker.snapshot(PoolStatus::default(), false).is_none());
        assert!(tracker.snapshot(PoolStatus::default(), true).is_some());
    }

    #[test]
    fn tracker_complete_is_100_percent_without_eta() {
        let tracker = Tracker::new(2);
        for i in 0..2 {
            tracker.mark_processing(i);
            tracker.mark_done(i, true);
        }
        let snapshot = tracker.snapshot(PoolStatus::default(), true).unwrap();
        assert_eq!(snapshot.overall_percent, 100);
        assert_eq!(snapshot.active, 0);
        assert!(snapshot.eta_seconds.is_none());
    }

    // ---- fan-out tests against a stubbed analyzer ----

    use vidsum_gemini::PoolConfig;

    /// Scripted analyzer: chunk `index` fails `count` times with the given
    /// error before succeeding.
    struct StubAnalyzer {
        failures: Mutex<HashMap<usize, (u32, &'static str)>>,
    }

    impl StubAnalyzer {
        fn ok() -> Self {
            Self {
                failures: Mutex::new(HashMap::new()),
            }
        }

        fn failing(index: usize, count: u32, kind: &'static str) -> Self {
            let mut failures = HashMap::new();
            failures.insert(index, (count, kind));
            Self {
                failures: Mutex::new(failures),
            }
        }

        fn error_for(kind: &str) -> GeminiError {
            match kind {
                "rate" => GeminiError::RateLimited("429".into()),
                "json" => GeminiError::BadJson("truncated".into()),
                "context" => GeminiError::ContextExceeded("too big".into()),
                _ => GeminiError::Transient("503".into()),
            }
        }
    }

    /// The prompt opens with "You are analyzing part K of N"; recover K.
    fn part_index(prompt: &str) -> usize {
        let part: usize = prompt
            .split_whitespace()
            .nth(4)
            .and_then(|s| s.parse().ok())
            .expect("prompt part number");
        part - 1
    }

    impl ChunkAnalyzer for StubAnalyzer {
        async fn analyze(
            &self,
            _credential: &str,
            _model_id: &str,
            _file: &FileRef,
            _mime_type: &str,
            prompt: &str,
            _cancel: &CancellationToken,
        ) -> Result<ChunkAnalysis, GeminiError> {
            let index = part_index(prompt);
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some((remaining, kind)) = failures.get_mut(&index) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(Self::error_for(kind));
                    }
                }
            }
            Ok(ChunkAnalysis {
                clean_script: format!("script {index}"),
                ..Default::default()
            })
        }
    }

    fn test_pool(n: usize) -> Arc<CredentialPool> {
        let secrets = (0..n).map(|i| format!("key-{i}")).collect();
        Arc::new(
            CredentialPool::new(
                secrets,
                PoolConfig {
                    per_cred_cap: 2,
                    cooldown: Duration::from_millis(10),
                    acquire_timeout: Duration::from_secs(1),
                },
            )
            .unwrap(),
        )
    }

    fn test_refs(n: usize) -> HashMap<usize, FileRef> {
        (0..n)
            .map(|i| {
                (
                    i,
                    FileRef {
                        uri: format!("https://files/{i}"),
                        name: format!("files/{i}"),
                    },
                )
            })
            .collect()
    }

    async fn run_scheduler(
        analyzer: StubAnalyzer,
        chunks: u64,
        cancel: &CancellationToken,
    ) -> WorkerResult<ChunkOutcome> {
        let pool = test_pool(2);
        let refs = test_refs(2);
        let scheduler = ChunkScheduler::new(pool, Arc::new(analyzer));
        let plan = ChunkPlan::plan_for_duration(chunks * 1200, 1200, 0);
        let noop = |_: ParallelProgress| {};
        scheduler
            .run(
                &plan,
                &refs,
                "video/mp4",
                "gemini-2.5-flash",
                12,
                cancel,
                SchedulerHooks::progress_only(&noop),
            )
            .await
    }

    #[tokio::test]
    async fn all_chunks_succeed_in_index_order() {
        let cancel = CancellationToken::new();
        let outcome = run_scheduler(StubAnalyzer::ok(), 3, &cancel).await.unwrap();

        assert_eq!(outcome.successful, 3);
        assert_eq!(outcome.failed, 0);
        assert!(!outcome.cancelled);
        for (i, result) in outcome.results.iter().enumerate() {
            assert_eq!(result.chunk_index, i);
            assert_eq!(result.chunk_start_offset_s, i as u64 * 1200);
            assert_eq!(result.analysis.clean_script, format!("script {i}"));
        }
    }

    #[tokio::test]
    async fn transient_chunk_failure_is_retried_once() {
        let cancel = CancellationToken::new();
        let outcome = run_scheduler(StubAnalyzer::failing(1, 1, "rate"), 3, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.successful, 3);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.results[1].analysis.clean_script, "script 1");
    }

    #[tokio::test]
    async fn twice_failed_chunk_becomes_placeholder() {
        let cancel = CancellationToken::new();
        let outcome = run_scheduler(StubAnalyzer::failing(1, 2, "json"), 3, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.successful, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.results.len(), 3);
        // Density preserved: index 1 is a placeholder for its window.
        assert_eq!(outcome.results[1].chunk_index, 1);
        assert!(outcome.results[1]
            .analysis
            .clean_script
            .starts_with("[Content from 00:20:00 to 00:40:00"));
        assert_eq!(outcome.results[1].analysis.chapters.len(), 1);
    }

    #[tokio::test]
    async fn context_exceeded_fails_the_job() {
        let cancel = CancellationToken::new();
        let result = run_scheduler(StubAnalyzer::failing(0, 9, "context"), 2, &cancel).await;
        assert!(matches!(
            result,
            Err(WorkerError::Gemini(GeminiError::ContextExceeded(_)))
        ));
    }

    #[tokio::test]
    async fn cancelled_run_returns_partial_with_flag() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_scheduler(StubAnalyzer::ok(), 3, &cancel).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.successful, 0);
        // Every chunk still has a (placeholder) entry.
        assert_eq!(outcome.results.len(), 3);
    }
}
