//! Time-based chunk planning.
//!
//! Long recordings are split into consecutive windows so each analysis call
//! fits the model's context. Duration is estimated from file size at a
//! nominal 16 MB per minute; the estimate is deliberately rough and the
//! last chunk may extend past the real end of the video.

use serde::{Deserialize, Serialize};

use crate::timestamp::format_seconds;

/// Nominal video bitrate used for duration estimation, in MB per minute.
const ESTIMATE_MB_PER_MINUTE: f64 = 16.0;

/// A contiguous time window of the source video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Dense, zero-based position in the plan
    pub index: usize,
    /// Window start, seconds from the beginning of the video
    pub start_s: u64,
    /// Window end in seconds; includes read-only overlap on non-terminal chunks
    pub end_s: u64,
}

impl Chunk {
    pub fn duration_s(&self) -> u64 {
        self.end_s.saturating_sub(self.start_s)
    }

    /// Absolute window formatted for prompts and log lines.
    pub fn window_label(&self) -> String {
        format!(
            "{} - {}",
            format_seconds(self.start_s as f64),
            format_seconds(self.end_s as f64)
        )
    }
}

/// The ordered partition of a video into chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    /// Target window length in seconds
    pub target_s: u64,
    /// Overlap appended to each non-terminal chunk, in seconds
    pub overlap_s: u64,
    /// Heuristic duration estimate the plan partitions
    pub estimated_duration_s: u64,
}

impl ChunkPlan {
    /// Plan chunks for a file of `size_bytes`.
    ///
    /// Windows of `target_s` seconds partition `[0, estimated)`; each
    /// non-terminal chunk's end is extended by `overlap_s` as read-only
    /// context, without shifting the next chunk's start. The last chunk is
    /// truncated to the estimate.
    pub fn plan(size_bytes: u64, target_s: u64, overlap_s: u64) -> Self {
        let estimated = estimate_duration_s(size_bytes);
        Self::plan_for_duration(estimated, target_s, overlap_s)
    }

    /// Plan chunks for a known (or pre-estimated) duration.
    pub fn plan_for_duration(estimated_duration_s: u64, target_s: u64, overlap_s: u64) -> Self {
        let target_s = target_s.max(1);
        let mut chunks = Vec::new();

        let mut start = 0u64;
        let mut index = 0usize;
        while start < estimated_duration_s {
            let core_end = (start + target_s).min(estimated_duration_s);
            let is_last = core_end >= estimated_duration_s;
            let end = if is_last { core_end } else { core_end + overlap_s };

            chunks.push(Chunk {
                index,
                start_s: start,
                end_s: end,
            });

            start = core_end;
            index += 1;
        }

        // Zero-length videos still get one empty window so downstream
        // indexes stay dense.
        if chunks.is_empty() {
            chunks.push(Chunk {
                index: 0,
                start_s: 0,
                end_s: 0,
            });
        }

        Self {
            chunks,
            target_s,
            overlap_s,
            estimated_duration_s,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Whether the whole estimate fits a single window.
    pub fn is_single_chunk(&self) -> bool {
        self.chunks.len() == 1
    }
}

/// Estimate duration in seconds from file size.
///
/// Assumes roughly 16 MB per minute of video. Explicitly approximate:
/// callers must tolerate the estimate over- or under-shooting the real
/// duration.
pub fn estimate_duration_s(size_bytes: u64) -> u64 {
    let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
    (size_mb / ESTIMATE_MB_PER_MINUTE * 60.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_matches_heuristic() {
        // 160 MB at 16 MB/min = 10 minutes.
        assert_eq!(estimate_duration_s(160 * 1024 * 1024), 600);
        assert_eq!(estimate_duration_s(0), 0);
    }

    #[test]
    fn single_chunk_when_estimate_fits_target() {
        let plan = ChunkPlan::plan_for_duration(900, 1200, 30);
        assert!(plan.is_single_chunk());
        assert_eq!(plan.chunks[0].start_s, 0);
        assert_eq!(plan.chunks[0].end_s, 900);
    }

    #[test]
    fn chunk_count_is_ceil_of_duration_over_target() {
        for (duration, target, expected) in
            [(1200, 1200, 1), (1201, 1200, 2), (2625, 1200, 3), (3600, 1200, 3)]
        {
            let plan = ChunkPlan::plan_for_duration(duration, target, 0);
            assert_eq!(plan.len(), expected, "duration={duration}");
        }
    }

    #[test]
    fn indexes_are_dense_and_cover_estimate() {
        let plan = ChunkPlan::plan_for_duration(2625, 600, 0);
        let mut covered = 0u64;
        for (i, chunk) in plan.chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            covered += chunk.duration_s();
        }
        assert_eq!(covered, 2625);
    }

    #[test]
    fn overlap_extends_end_without_moving_next_start() {
        let plan = ChunkPlan::plan_for_duration(2400, 1200, 300);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.chunks[0].start_s, 0);
        assert_eq!(plan.chunks[0].end_s, 1500);
        assert_eq!(plan.chunks[1].start_s, 1200);
        assert_eq!(plan.chunks[1].end_s, 2400);
    }

    #[test]
    fn last_chunk_truncated_to_estimate() {
        // 350 MB estimates to ~21.9 minutes: two chunks at target=20min.
        let plan = ChunkPlan::plan(350 * 1024 * 1024, 1200, 5);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.chunks[0].start_s, 0);
        assert_eq!(plan.chunks[0].end_s, 1205);
        assert_eq!(plan.chunks[1].start_s, 1200);
        assert_eq!(plan.chunks[1].end_s, plan.estimated_duration_s);
        assert!(plan.chunks[1].end_s < 1200 + 1200);
    }

    #[test]
    fn zero_size_yields_one_empty_chunk() {
        let plan = ChunkPlan::plan(0, 1200, 0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.chunks[0].duration_s(), 0);
    }

    #[test]
    fn plan_serde_roundtrip() {
        let plan = ChunkPlan::plan_for_duration(2625, 1200, 5);
        let json = serde_json::to_string(&plan).expect("serialize plan");
        let decoded: ChunkPlan = serde_json::from_str(&json).expect("deserialize plan");
        assert_eq!(decoded, plan);
    }
}
