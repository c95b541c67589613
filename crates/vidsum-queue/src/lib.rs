//! Redis-backed durable job queue.
//!
//! This crate provides:
//! - Bounded FIFO submission with duplicate rejection
//! - Atomic leasing with stale-lease reclaim
//! - Retry scheduling with exponential backoff
//! - Progress events via Redis Pub/Sub

pub mod error;
pub mod progress;
pub mod queue;
pub mod record;

pub use error::{QueueError, QueueResult};
pub use progress::ProgressChannel;
pub use queue::{
    JobQueue, LeasedJob, QueueConfig, QueueStats, SubmitReceipt, UserQueueStatus, WaitingEntry,
};
pub use record::JobRecord;
