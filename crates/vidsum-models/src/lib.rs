//! Shared data models for the vidsum pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and lifecycle states
//! - Progress stages and channel events
//! - Chunk plans and the duration heuristic
//! - Analysis documents and the merged artifact
//! - Timestamp and duration parsing

pub mod analysis;
pub mod chunk;
pub mod job;
pub mod progress;
pub mod timestamp;

// Re-export common types
pub use analysis::{
    Chapter, ChunkAnalysis, ChunkResult, ContentMetadata, FilteredCategory, MergedArtifact,
    MergedContentMetadata, ProcessingMetadata, TimeRange,
};
pub use chunk::{estimate_duration_s, Chunk, ChunkPlan};
pub use job::{AnalyzeVideoJob, JobId, JobState};
pub use progress::{JobEvent, JobProgress, JobStage};
pub use timestamp::{format_seconds, parse_duration, parse_timestamp, TimestampError};
