//! Video analysis worker.
//!
//! This crate provides:
//! - Job executor with lease heartbeat and stale sweeps
//! - The per-job processing pipeline (upload, plan, analyze, merge, trim)
//! - The parallel chunk scheduler
//! - The result merger
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod merger;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod trimmer;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use merger::{merge, MergeStats};
pub use processor::{process_job, ProcessingContext, ProgressSink};
pub use scheduler::{
    ChunkAnalyzer, ChunkOutcome, ChunkScheduler, ChunkTaskSnapshot, ChunkTaskStatus,
    ParallelProgress, SchedulerHooks,
};
pub use trimmer::FfmpegTrimmer;
