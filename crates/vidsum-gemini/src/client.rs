//! Gemini content-generation client for chunk analysis.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vidsum_models::ChunkAnalysis;

use crate::error::{GeminiError, GeminiResult};
use crate::repair::{repair_truncated, strip_code_fences};
use crate::upload::FileRef;

/// Hard deadline for a single generate call.
const GENERATE_DEADLINE: Duration = Duration::from_secs(8 * 60);

/// Gemini API request.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData<'a>>,
}

#[derive(Debug, Serialize)]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_k: 32,
            top_p: 0.95,
            max_output_tokens: 16384,
            response_mime_type: "application/json",
        }
    }
}

/// Gemini API response.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Content-generation client. One instance serves all credentials; the key
/// is passed per call.
pub struct GenerateClient {
    client: Client,
    base_url: String,
}

impl GenerateClient {
    pub fn new(base_url: impl Into<String>) -> GeminiResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(GeminiError::from_reqwest)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn with_defaults() -> GeminiResult<Self> {
        Self::new("https://generativelanguage.googleapis.com")
    }

    /// Run one analysis call for an uploaded file and parse the returned
    /// JSON document.
    ///
    /// The call has an 8-minute deadline; fenced output is unwrapped and a
    /// truncated document gets exactly one repair-and-reparse attempt.
    pub async fn generate(
        &self,
        credential: &str,
        model_id: &str,
        file: &FileRef,
        mime_type: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> GeminiResult<ChunkAnalysis> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model_id, credential
        );

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: None,
                        file_data: Some(FileData {
                            mime_type,
                            file_uri: &file.uri,
                        }),
                    },
                    Part {
                        text: Some(prompt),
                        file_data: None,
                    },
                ],
            }],
            generation_config: GenerationConfig::default(),
        };

        let send = self
            .client
            .post(&url)
            .timeout(GENERATE_DEADLINE)
            .json(&request)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(GeminiError::Cancelled),
            res = send => res.map_err(GeminiError::from_reqwest)?,
        };

        let status = response.status();
        let body = response.text().await.map_err(GeminiError::from_reqwest)?;
        if !status.is_success() {
            return Err(GeminiError::from_status(status, &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| GeminiError::BadResponse(format!("generate response: {}", e)))?;

        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| {
                GeminiError::BadResponse("no content in generate response".to_string())
            })?;

        parse_analysis(text)
    }
}

/// Parse model output into a [`ChunkAnalysis`], unwrapping fences and
/// repairing truncation once.
pub fn parse_analysis(text: &str) -> GeminiResult<ChunkAnalysis> {
    let text = strip_code_fences(text);

    match serde_json::from_str::<ChunkAnalysis>(text) {
        Ok(analysis) => Ok(analysis),
        Err(first_err) => {
            let Some(repaired) = repair_truncated(text) else {
                return Err(GeminiError::BadJson(first_err.to_string()));
            };
            debug!("Analysis JSON did not parse, attempting repaired reparse");
            serde_json::from_str::<ChunkAnalysis>(&repaired).map_err(|second_err| {
                warn!(error = %second_err, "Repaired analysis JSON still did not parse");
                GeminiError::BadJson(first_err.to_string())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_document() {
        let doc = parse_analysis(r#"{"clean_script": "hello", "summary": "s"}"#).unwrap();
        assert_eq!(doc.clean_script, "hello");
    }

    #[test]
    fn parses_fenced_document() {
        let doc = parse_analysis("```json\n{\"clean_script\": \"hi\"}\n```").unwrap();
        assert_eq!(doc.clean_script, "hi");
    }

    #[test]
    fn repairs_truncated_document() {
        let doc = parse_analysis(r#"{"clean_script": "cut off mid sent"#).unwrap();
        assert_eq!(doc.clean_script, "cut off mid sent");
    }

    #[test]
    fn unrepairable_document_is_bad_json() {
        assert!(matches!(
            parse_analysis("not json at all"),
            Err(GeminiError::BadJson(_))
        ));
    }

    #[test]
    fn request_serialization_shape() {
        let file = FileRef {
            uri: "https://files/abc".to_string(),
            name: "files/abc".to_string(),
        };
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: None,
                        file_data: Some(FileData {
                            mime_type: "video/mp4",
                            file_uri: &file.uri,
                        }),
                    },
                    Part {
                        text: Some("analyze"),
                        file_data: None,
                    },
                ],
            }],
            generation_config: GenerationConfig::default(),
        };

        let json = serde_json::to_value(&request).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["file_data"]["file_uri"], "https://files/abc");
        assert!(parts[0].get("text").is_none());
        assert_eq!(parts[1]["text"], "analyze");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 16384);
        assert_eq!(json["generationConfig"]["topK"], 32);
    }
}
