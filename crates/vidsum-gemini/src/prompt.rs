//! Prompt construction for chunk analysis calls.

use vidsum_models::chunk::Chunk;

/// Build the analysis prompt for one chunk.
///
/// The model sees only its own window of the video, so it is told to use
/// RELATIVE timestamps starting at `00:00`; the merger translates them to
/// absolute times afterwards. The absolute window is included for context
/// only.
pub fn build_chunk_prompt(chunk: &Chunk, total_chunks: usize) -> String {
    let window = chunk.window_label();
    let part = chunk.index + 1;

    format!(
        r#"You are analyzing part {part} of {total_chunks} of a longer video recording.
This part covers {window} of the full recording, but the file you were given contains ONLY this segment.

Analyze everything you see and produce a structured study companion for this segment.

IMPORTANT: All timestamps in your answer must be RELATIVE to the start of THIS segment, beginning at 00:00. Do not use absolute times from the full recording.

IMPORTANT: You must strictly follow this output format.
Return ONLY a single JSON object with this schema:
{{
  "clean_script": "Faithful transcript of the spoken content with filler words, false starts and repetitions removed",
  "chapters": [
    {{
      "title": "Chapter title",
      "start_time": "MM:SS",
      "end_time": "MM:SS",
      "description": "One-sentence description"
    }}
  ],
  "summary": "Concise summary of this segment",
  "concepts": ["Key concept or term introduced in this segment"],
  "practice": ["A practice question or exercise grounded in this segment"],
  "content_metadata": {{
    "original_duration_estimate": "MM:SS",
    "essential_content_duration": "MM:SS",
    "removed_percentage": 0,
    "filtered_categories": [
      {{
        "category": "Category of removed content (ads, small talk, dead air, housekeeping)",
        "total_duration": "MM:SS",
        "description": "What was removed and why"
      }}
    ],
    "main_content_timestamps": [
      {{ "start": "MM:SS", "end": "MM:SS" }}
    ]
  }}
}}

Additional instructions:
- Return ONLY the JSON object and nothing else.
- "main_content_timestamps" lists the segments worth keeping, in order, relative to this part.
- If the segment ends before this window does, describe only what exists and leave the remaining fields empty.
- Timestamps use "MM:SS" or "HH:MM:SS" format.
"#
    )
}
