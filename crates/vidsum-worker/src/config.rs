//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Largest file accepted at lease time.
pub const MAX_FILE_SIZE_BYTES: u64 = 1024 * 1024 * 1024;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on concurrent chunk analyses within one job
    pub max_concurrent_chunks: usize,
    /// Target chunk length in minutes
    pub chunk_size_minutes: u64,
    /// Read-only overlap appended to non-terminal chunks, in seconds
    pub chunk_overlap_seconds: u64,
    /// Ingress hint for auto-chunking; stored for parity, unused by the core
    pub auto_chunk_threshold_mb: u64,
    /// Directory for per-job source and output files
    pub temp_video_dir: PathBuf,
    /// Soft deadline for a whole job
    pub job_deadline: Duration,
    /// Lease heartbeat period
    pub heartbeat_interval: Duration,
    /// Stale-lease sweep period
    pub sweep_interval: Duration,
    /// Grace before trimmed output is deleted
    pub cleanup_grace: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_chunks: 12,
            chunk_size_minutes: 20,
            chunk_overlap_seconds: 0,
            auto_chunk_threshold_mb: 500,
            temp_video_dir: PathBuf::from("/tmp/vidsum"),
            job_deadline: Duration::from_secs(15 * 60),
            heartbeat_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            cleanup_grace: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_chunks: std::env::var("MAX_CONCURRENT_CHUNKS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent_chunks),
            chunk_size_minutes: std::env::var("CHUNK_SIZE_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.chunk_size_minutes),
            chunk_overlap_seconds: std::env::var("CHUNK_OVERLAP_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.chunk_overlap_seconds),
            auto_chunk_threshold_mb: std::env::var("AUTO_CHUNK_THRESHOLD_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.auto_chunk_threshold_mb),
            temp_video_dir: std::env::var("TEMP_VIDEO_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_video_dir),
            job_deadline: Duration::from_secs(
                std::env::var("JOB_DEADLINE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15 * 60),
            ),
            heartbeat_interval: defaults.heartbeat_interval,
            sweep_interval: defaults.sweep_interval,
            cleanup_grace: defaults.cleanup_grace,
            shutdown_timeout: defaults.shutdown_timeout,
        }
    }

    /// Target chunk length in seconds.
    pub fn chunk_target_s(&self) -> u64 {
        self.chunk_size_minutes * 60
    }
}
