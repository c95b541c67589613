//! Folds per-chunk analyses into one artifact with absolute timestamps.
//!
//! Chunk documents carry timestamps relative to their own window; every
//! time that leaves this module is absolute. Input must be sorted by
//! `chunk_index` and index-dense (failed chunks arrive as placeholders).

use std::collections::HashMap;

use vidsum_models::{
    Chapter, ChunkResult, FilteredCategory, MergedArtifact, MergedContentMetadata,
    ProcessingMetadata, TimeRange,
};
use vidsum_models::timestamp::{format_seconds, parse_duration, parse_timestamp};

/// Counters the scheduler hands over for `processing_metadata`.
#[derive(Debug, Clone)]
pub struct MergeStats {
    pub successful_chunks: usize,
    pub failed_chunks: usize,
    pub model_id: String,
    pub processing_seconds: u64,
}

/// Merge chunk results, sorted by `chunk_index`, into the final artifact.
pub fn merge(results: &[ChunkResult], stats: MergeStats) -> MergedArtifact {
    MergedArtifact {
        clean_script: merge_script(results),
        chapters: merge_chapters(results),
        summary: merge_summary(results),
        concepts: dedup_preserving_order(results.iter().flat_map(|r| r.analysis.concepts.iter())),
        practice: dedup_preserving_order(results.iter().flat_map(|r| r.analysis.practice.iter())),
        content_metadata: merge_content_metadata(results),
        processing_metadata: ProcessingMetadata {
            total_chunks: results.len(),
            successful_chunks: stats.successful_chunks,
            failed_chunks: stats.failed_chunks,
            model_id: stats.model_id,
            processing_seconds: stats.processing_seconds,
            trimmed_output: None,
        },
    }
}

/// Concatenate scripts, marking each continuation with its absolute start.
fn merge_script(results: &[ChunkResult]) -> String {
    let mut parts = Vec::with_capacity(results.len());
    for result in results {
        if result.chunk_index == 0 {
            parts.push(result.analysis.clean_script.clone());
        } else {
            let marker = format_seconds(result.chunk_start_offset_s as f64);
            parts.push(format!(
                "[continuing from {}]\n{}",
                marker, result.analysis.clean_script
            ));
        }
    }
    parts.join("\n\n")
}

/// Translate chapter times to absolute; output order is chunk order, then
/// each chunk's internal order.
fn merge_chapters(results: &[ChunkResult]) -> Vec<Chapter> {
    let mut chapters = Vec::new();
    for result in results {
        let offset = result.chunk_start_offset_s as f64;
        for chapter in &result.analysis.chapters {
            chapters.push(Chapter {
                title: chapter.title.clone(),
                start_time: translate(&chapter.start_time, offset),
                end_time: translate(&chapter.end_time, offset),
                description: chapter.description.clone(),
            });
        }
    }
    chapters
}

fn merge_summary(results: &[ChunkResult]) -> String {
    let mut parts = Vec::with_capacity(results.len());
    for result in results {
        let onwards = format_seconds(result.chunk_start_offset_s as f64);
        parts.push(format!(
            "Part {} ({} onwards)\n{}",
            result.chunk_index + 1,
            onwards,
            result.analysis.summary
        ));
    }
    parts.join("\n\n")
}

/// Case-insensitive, trim-based dedup; first occurrence wins and order is
/// preserved.
fn dedup_preserving_order<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

fn merge_content_metadata(results: &[ChunkResult]) -> MergedContentMetadata {
    let mut original_s = 0.0;
    let mut essential_s = 0.0;
    let mut removed_sum = 0.0;

    // Category name -> (first-seen position, summed seconds, description).
    let mut category_order: Vec<String> = Vec::new();
    let mut categories: HashMap<String, (f64, String)> = HashMap::new();
    let mut timestamps = Vec::new();

    for result in results {
        let meta = &result.analysis.content_metadata;
        let offset = result.chunk_start_offset_s as f64;

        original_s += parse_duration(&meta.original_duration_estimate);
        essential_s += parse_duration(&meta.essential_content_duration);
        removed_sum += meta.removed_percentage;

        for category in &meta.filtered_categories {
            let seconds = parse_duration(&category.total_duration);
            match categories.get_mut(&category.category) {
                Some((total, _)) => *total += seconds,
                None => {
                    category_order.push(category.category.clone());
                    categories.insert(
                        category.category.clone(),
                        (seconds, category.description.clone()),
                    );
                }
            }
        }

        for range in &meta.main_content_timestamps {
            timestamps.push(TimeRange {
                start: translate(&range.start, offset),
                end: translate(&range.end, offset),
            });
        }
    }

    let removed_percentage = if results.is_empty() {
        0
    } else {
        (removed_sum / results.len() as f64).round() as u32
    };

    let filtered_categories = category_order
        .into_iter()
        .map(|name| {
            let (seconds, description) = categories.remove(&name).unwrap_or_default();
            FilteredCategory {
                category: name,
                total_duration: format_seconds(seconds),
                description,
            }
        })
        .collect();

    MergedContentMetadata {
        original_duration: format_seconds(original_s),
        essential_content_duration: format_seconds(essential_s),
        removed_percentage,
        filtered_categories,
        main_content_timestamps: timestamps,
    }
}

/// Shift a relative `MM:SS` / `HH:MM:SS` timestamp by `offset` seconds.
/// Unparseable input is treated as the chunk start.
fn translate(relative: &str, offset: f64) -> String {
    let seconds = parse_timestamp(relative).unwrap_or(0.0);
    format_seconds(seconds + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidsum_models::{ChunkAnalysis, ContentMetadata};

    fn stats() -> MergeStats {
        MergeStats {
            successful_chunks: 0,
            failed_chunks: 0,
            model_id: "gemini-2.5-flash".to_string(),
            processing_seconds: 0,
        }
    }

    fn chunk(index: usize, offset: u64, analysis: ChunkAnalysis) -> ChunkResult {
        ChunkResult {
            chunk_index: index,
            chunk_start_offset_s: offset,
            analysis,
        }
    }

    fn chaptered(title: &str, start: &str, end: &str) -> Chapter {
        Chapter {
            title: title.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            description: None,
        }
    }

    #[test]
    fn chapters_translate_to_absolute_times() {
        let results = vec![
            chunk(
                0,
                0,
                ChunkAnalysis {
                    chapters: vec![chaptered("Intro", "00:00", "05:00")],
                    ..Default::default()
                },
            ),
            chunk(
                1,
                1200,
                ChunkAnalysis {
                    chapters: vec![chaptered("Main theorem", "05:00", "09:30")],
                    ..Default::default()
                },
            ),
        ];

        let merged = merge(&results, stats());
        assert_eq!(merged.chapters.len(), 2);
        assert_eq!(merged.chapters[0].start_time, "00:00:00");
        assert_eq!(merged.chapters[0].end_time, "00:05:00");
        // Relative 05:00 in chunk 1 becomes absolute 25:00.
        assert_eq!(merged.chapters[1].start_time, "00:25:00");
        assert_eq!(merged.chapters[1].end_time, "00:29:30");
    }

    #[test]
    fn chapter_offsets_round_trip() {
        let results = vec![chunk(
            1,
            1200,
            ChunkAnalysis {
                chapters: vec![chaptered("X", "03:20", "07:45")],
                ..Default::default()
            },
        )];

        let merged = merge(&results, stats());
        let absolute = parse_timestamp(&merged.chapters[0].start_time).unwrap();
        assert_eq!(absolute - 1200.0, parse_timestamp("03:20").unwrap());
    }

    #[test]
    fn script_joins_with_continuation_markers() {
        let results = vec![
            chunk(
                0,
                0,
                ChunkAnalysis {
                    clean_script: "First part.".to_string(),
                    ..Default::default()
                },
            ),
            chunk(
                1,
                1200,
                ChunkAnalysis {
                    clean_script: "Second part.".to_string(),
                    ..Default::default()
                },
            ),
        ];

        let merged = merge(&results, stats());
        assert!(merged.clean_script.starts_with("First part."));
        assert!(merged
            .clean_script
            .contains("[continuing from 00:20:00]\nSecond part."));
    }

    #[test]
    fn summary_parts_are_labelled() {
        let results = vec![
            chunk(
                0,
                0,
                ChunkAnalysis {
                    summary: "Covers basics.".to_string(),
                    ..Default::default()
                },
            ),
            chunk(
                1,
                1200,
                ChunkAnalysis {
                    summary: "Covers proofs.".to_string(),
                    ..Default::default()
                },
            ),
        ];

        let merged = merge(&results, stats());
        assert!(merged.summary.contains("Part 1 (00:00:00 onwards)"));
        assert!(merged.summary.contains("Part 2 (00:20:00 onwards)"));
    }

    #[test]
    fn concept_dedup_is_case_insensitive_first_wins() {
        let results = vec![
            chunk(
                0,
                0,
                ChunkAnalysis {
                    concepts: vec!["Gradient Descent".to_string(), "Backprop".to_string()],
                    ..Default::default()
                },
            ),
            chunk(
                1,
                1200,
                ChunkAnalysis {
                    concepts: vec![
                        " gradient descent ".to_string(),
                        "Momentum".to_string(),
                        "BACKPROP".to_string(),
                    ],
                    ..Default::default()
                },
            ),
        ];

        let merged = merge(&results, stats());
        assert_eq!(
            merged.concepts,
            vec!["Gradient Descent", "Backprop", "Momentum"]
        );
    }

    #[test]
    fn metadata_aggregates_across_chunks() {
        let meta = |orig: &str, ess: &str, removed: f64, cat: &str, dur: &str| ContentMetadata {
            original_duration_estimate: orig.to_string(),
            essential_content_duration: ess.to_string(),
            removed_percentage: removed,
            filtered_categories: vec![FilteredCategory {
                category: cat.to_string(),
                total_duration: dur.to_string(),
                description: format!("{cat} content"),
            }],
            main_content_timestamps: vec![TimeRange {
                start: "01:00".to_string(),
                end: "02:00".to_string(),
            }],
        };

        let results = vec![
            chunk(
                0,
                0,
                ChunkAnalysis {
                    content_metadata: meta("20:00", "15:00", 25.0, "ads", "02:00"),
                    ..Default::default()
                },
            ),
            chunk(
                1,
                1200,
                ChunkAnalysis {
                    content_metadata: meta("10 minutes", "8 minutes", 20.0, "ads", "01:00"),
                    ..Default::default()
                },
            ),
        ];

        let merged = merge(&results, stats());
        let meta = &merged.content_metadata;

        // 20:00 + 10 minutes = 30 minutes.
        assert_eq!(meta.original_duration, "00:30:00");
        assert_eq!(meta.essential_content_duration, "00:23:00");
        // round(mean(25, 20)) = 23.
        assert_eq!(meta.removed_percentage, 23);

        assert_eq!(meta.filtered_categories.len(), 1);
        assert_eq!(meta.filtered_categories[0].category, "ads");
        assert_eq!(meta.filtered_categories[0].total_duration, "00:03:00");
        assert_eq!(meta.filtered_categories[0].description, "ads content");

        assert_eq!(meta.main_content_timestamps.len(), 2);
        assert_eq!(meta.main_content_timestamps[0].start, "00:01:00");
        assert_eq!(meta.main_content_timestamps[1].start, "00:21:00");
        assert_eq!(meta.main_content_timestamps[1].end, "00:22:00");
    }

    #[test]
    fn unknown_durations_count_as_zero() {
        let results = vec![chunk(
            0,
            0,
            ChunkAnalysis {
                content_metadata: ContentMetadata {
                    original_duration_estimate: "Unknown".to_string(),
                    essential_content_duration: "Unknown".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        )];

        let merged = merge(&results, stats());
        assert_eq!(merged.content_metadata.original_duration, "00:00:00");
    }

    #[test]
    fn placeholder_chunk_keeps_section_density() {
        let results = vec![
            chunk(
                0,
                0,
                ChunkAnalysis {
                    chapters: vec![chaptered("A", "00:00", "10:00")],
                    ..Default::default()
                },
            ),
            chunk(1, 1200, ChunkAnalysis::placeholder(1200, 2400, "bad JSON")),
            chunk(
                2,
                2400,
                ChunkAnalysis {
                    chapters: vec![chaptered("C", "00:00", "03:45")],
                    ..Default::default()
                },
            ),
        ];

        let merged = merge(
            &results,
            MergeStats {
                successful_chunks: 2,
                failed_chunks: 1,
                ..stats()
            },
        );

        assert_eq!(merged.chapters.len(), 3);
        // The placeholder chapter lands at its chunk's absolute window.
        assert_eq!(merged.chapters[1].start_time, "00:20:00");
        assert_eq!(merged.chapters[1].end_time, "00:40:00");
        assert_eq!(merged.processing_metadata.failed_chunks, 1);
        assert_eq!(merged.processing_metadata.successful_chunks, 2);
        assert_eq!(merged.processing_metadata.total_chunks, 3);
    }

    #[test]
    fn empty_input_produces_empty_artifact() {
        let merged = merge(&[], stats());
        assert!(merged.clean_script.is_empty());
        assert!(merged.chapters.is_empty());
        assert_eq!(merged.content_metadata.removed_percentage, 0);
    }
}
