//! External video trimmer invocation.
//!
//! The merger's `main_content_timestamps` drive an ffmpeg subprocess that
//! concatenates the kept segments into one output file. The trim algorithm
//! itself lives entirely in ffmpeg; this module only builds the filter
//! graph and shells out.

use std::path::Path;

use tracing::{info, warn};

use vidsum_models::timestamp::parse_timestamp;
use vidsum_models::TimeRange;

use crate::error::{WorkerError, WorkerResult};

/// ffmpeg-backed trimmer.
#[derive(Debug, Clone)]
pub struct FfmpegTrimmer {
    binary: String,
}

impl Default for FfmpegTrimmer {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }
}

impl FfmpegTrimmer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Cut `segments` out of `source` and concatenate them into `output`.
    /// Blocks until ffmpeg exits.
    pub async fn trim(
        &self,
        source: &Path,
        segments: &[TimeRange],
        output: &Path,
    ) -> WorkerResult<()> {
        let filter = build_filter(segments)
            .ok_or_else(|| WorkerError::TrimFailed("no valid segments to keep".to_string()))?;

        info!(
            source = %source.display(),
            output = %output.display(),
            segments = segments.len(),
            "Trimming video"
        );

        let result = tokio::process::Command::new(&self.binary)
            .arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-filter_complex")
            .arg(&filter)
            .arg("-map")
            .arg("[outv]")
            .arg("-map")
            .arg("[outa]")
            .arg(output)
            .output()
            .await
            .map_err(|e| WorkerError::TrimFailed(format!("failed to spawn {}: {}", self.binary, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            warn!(status = ?result.status.code(), "ffmpeg trim failed");
            return Err(WorkerError::TrimFailed(tail));
        }

        Ok(())
    }
}

/// Build a trim/concat filter graph for the kept segments. Returns `None`
/// when no segment parses to a positive-length window.
fn build_filter(segments: &[TimeRange]) -> Option<String> {
    let mut windows = Vec::new();
    for segment in segments {
        let start = parse_timestamp(&segment.start).ok()?;
        let end = parse_timestamp(&segment.end).ok()?;
        if end > start {
            windows.push((start, end));
        }
    }
    if windows.is_empty() {
        return None;
    }

    let mut filter = String::new();
    for (i, (start, end)) in windows.iter().enumerate() {
        filter.push_str(&format!(
            "[0:v]trim=start={start}:end={end},setpts=PTS-STARTPTS[v{i}];\
             [0:a]atrim=start={start}:end={end},asetpts=PTS-STARTPTS[a{i}];"
        ));
    }
    for i in 0..windows.len() {
        filter.push_str(&format!("[v{i}][a{i}]"));
    }
    filter.push_str(&format!(
        "concat=n={}:v=1:a=1[outv][outa]",
        windows.len()
    ));
    Some(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &str, end: &str) -> TimeRange {
        TimeRange {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    #[test]
    fn filter_covers_all_segments() {
        let filter =
            build_filter(&[range("00:00:10", "00:01:00"), range("00:02:00", "00:03:30")]).unwrap();
        assert!(filter.contains("trim=start=10:end=60"));
        assert!(filter.contains("trim=start=120:end=210"));
        assert!(filter.ends_with("concat=n=2:v=1:a=1[outv][outa]"));
    }

    #[test]
    fn zero_length_segments_are_dropped() {
        assert!(build_filter(&[range("00:01:00", "00:01:00")]).is_none());
        assert!(build_filter(&[]).is_none());
    }

    #[test]
    fn unparseable_segment_fails_filter() {
        assert!(build_filter(&[range("not-a-time", "00:01:00")]).is_none());
    }
}
