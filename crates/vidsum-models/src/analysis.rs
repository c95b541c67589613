//! Analysis documents returned by the model and the merged artifact.
//!
//! Chunk analyses use timestamps relative to their own window; the merged
//! artifact is absolute. Every field the model fills is `#[serde(default)]`
//! tolerant, since partially-filled documents are common.

use serde::{Deserialize, Serialize};

use crate::timestamp::format_seconds;

/// A chapter within an analysis document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    /// `MM:SS` or `HH:MM:SS`
    pub start_time: String,
    pub end_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A start/end timestamp pair, `HH:MM:SS` formatted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// Aggregated duration for one category of removed content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredCategory {
    pub category: String,
    pub total_duration: String,
    #[serde(default)]
    pub description: String,
}

/// Metadata the model reports about what it kept and removed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentMetadata {
    #[serde(default)]
    pub original_duration_estimate: String,
    #[serde(default)]
    pub essential_content_duration: String,
    #[serde(default)]
    pub removed_percentage: f64,
    #[serde(default)]
    pub filtered_categories: Vec<FilteredCategory>,
    /// Segments worth keeping, relative to the chunk window
    #[serde(default)]
    pub main_content_timestamps: Vec<TimeRange>,
}

/// One chunk's analysis document, as returned by the model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkAnalysis {
    #[serde(default)]
    pub clean_script: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub practice: Vec<String>,
    #[serde(default)]
    pub content_metadata: ContentMetadata,
}

impl ChunkAnalysis {
    /// Minimal valid analysis substituted for a failed chunk.
    ///
    /// Keeps chunk-index density for the merger: one chapter covering the
    /// window, empty aggregates, and a script line naming the failure.
    pub fn placeholder(start_s: u64, end_s: u64, reason: &str) -> Self {
        let start = format_seconds(start_s as f64);
        let end = format_seconds(end_s as f64);
        let duration = end_s.saturating_sub(start_s);

        Self {
            clean_script: format!("[Content from {} to {} - {}]", start, end, reason),
            chapters: vec![Chapter {
                title: "[Analysis failed for this segment]".to_string(),
                start_time: "00:00:00".to_string(),
                end_time: format_seconds(duration as f64),
                description: Some(reason.to_string()),
            }],
            summary: format!("Segment {} - {} could not be analyzed: {}", start, end, reason),
            concepts: Vec::new(),
            practice: Vec::new(),
            content_metadata: ContentMetadata {
                original_duration_estimate: format_seconds(duration as f64),
                essential_content_duration: "Unknown".to_string(),
                removed_percentage: 0.0,
                filtered_categories: Vec::new(),
                main_content_timestamps: Vec::new(),
            },
        }
    }
}

/// A chunk's analysis plus its position in the video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_index: usize,
    /// Absolute start of the chunk window, for timestamp translation
    pub chunk_start_offset_s: u64,
    pub analysis: ChunkAnalysis,
}

/// Content metadata aggregated across all chunks, absolute timestamps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MergedContentMetadata {
    /// `HH:MM:SS`
    pub original_duration: String,
    pub essential_content_duration: String,
    /// Rounded mean across chunks
    pub removed_percentage: u32,
    pub filtered_categories: Vec<FilteredCategory>,
    pub main_content_timestamps: Vec<TimeRange>,
}

/// Bookkeeping about how the artifact was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub total_chunks: usize,
    pub successful_chunks: usize,
    pub failed_chunks: usize,
    pub model_id: String,
    /// Wall-clock processing time in seconds
    pub processing_seconds: u64,
    /// Path of the trimmed rendition, when the trimmer ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trimmed_output: Option<String>,
}

/// The single structured output produced by folding chunk analyses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedArtifact {
    pub clean_script: String,
    /// Absolute-time chapters, in chunk order then internal order
    pub chapters: Vec<Chapter>,
    pub summary: String,
    pub concepts: Vec<String>,
    pub practice: Vec<String>,
    pub content_metadata: MergedContentMetadata,
    pub processing_metadata: ProcessingMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_deserializes_with_defaults() {
        let json = r#"{"clean_script": "hello", "summary": "short"}"#;
        let doc: ChunkAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(doc.clean_script, "hello");
        assert!(doc.chapters.is_empty());
        assert!(doc.concepts.is_empty());
        assert_eq!(doc.content_metadata.removed_percentage, 0.0);
    }

    #[test]
    fn placeholder_is_minimally_valid() {
        let p = ChunkAnalysis::placeholder(1200, 1314, "deadline exceeded");
        assert!(p.clean_script.contains("00:20:00"));
        assert!(p.clean_script.contains("deadline exceeded"));
        assert_eq!(p.chapters.len(), 1);
        assert_eq!(p.chapters[0].start_time, "00:00:00");
        assert_eq!(p.chapters[0].end_time, "00:01:54");
        assert!(p.concepts.is_empty());
        assert!(p.content_metadata.main_content_timestamps.is_empty());
    }

    #[test]
    fn chunk_result_serde_roundtrip() {
        let result = ChunkResult {
            chunk_index: 2,
            chunk_start_offset_s: 2400,
            analysis: ChunkAnalysis::placeholder(2400, 2625, "rate limited"),
        };
        let json = serde_json::to_string(&result).unwrap();
        let decoded: ChunkResult = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.chunk_index, 2);
        assert_eq!(decoded.chunk_start_offset_s, 2400);
        assert_eq!(decoded.analysis, result.analysis);
    }
}
