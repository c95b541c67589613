//! Resumable file upload against the Gemini file-intake endpoint.
//!
//! Two-step protocol: an initiate POST returns an opaque upload URL in the
//! `X-Goog-Upload-URL` header, then the file body is PUT to that URL in
//! fixed-size windows. A file that fits a single window goes as one
//! `(offset 0, "upload, finalize")` segment, exactly the protocol's
//! single-shot shape. The file is usable once its status endpoint reports
//! `ACTIVE`.
//!
//! Memory use is bounded by the window size: the file is read from disk
//! one window at a time, never as a whole.

use std::path::Path;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GeminiError, GeminiResult};

/// Transfer window size; also the ceiling on read-buffer memory.
const TRANSFER_WINDOW_BYTES: u64 = 64 * 1024 * 1024;
/// Transient failures are retried this many times per request.
const MAX_REQUEST_ATTEMPTS: u32 = 3;

/// Upload adapter configuration.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Service base URL
    pub base_url: String,
    /// Timeout for the initiate request
    pub init_timeout: Duration,
    /// Timeout for each body PUT
    pub transfer_timeout: Duration,
    /// Timeout for each status poll
    pub poll_timeout: Duration,
    /// Delay between status polls
    pub poll_interval: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            init_timeout: Duration::from_secs(60),
            transfer_timeout: Duration::from_secs(600),
            poll_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Durable reference to an uploaded file, scoped to the credential that
/// uploaded it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    /// `file_uri` used in generate calls
    pub uri: String,
    /// Resource name used by the status endpoint, e.g. `files/abc123`
    pub name: String,
}

#[derive(Debug, Serialize)]
struct InitiateBody<'a> {
    file: InitiateFile<'a>,
}

#[derive(Debug, Serialize)]
struct InitiateFile<'a> {
    #[serde(rename = "displayName")]
    display_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct FinalizeResponse {
    file: FinalizeFile,
}

#[derive(Debug, Deserialize)]
struct FinalizeFile {
    uri: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FileStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: Option<FileStatusError>,
}

#[derive(Debug, Deserialize)]
struct FileStatusError {
    #[serde(default)]
    message: String,
}

/// Streaming, resumable uploader.
pub struct FileUploader {
    client: Client,
    config: UploadConfig,
}

impl FileUploader {
    pub fn new(config: UploadConfig) -> GeminiResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(GeminiError::from_reqwest)?;
        Ok(Self { client, config })
    }

    pub fn with_defaults() -> GeminiResult<Self> {
        Self::new(UploadConfig::default())
    }

    /// Upload `path` with the given credential and return its durable
    /// reference. `progress(sent, total)` fires after every transferred
    /// window.
    pub async fn upload(
        &self,
        credential: &str,
        path: &Path,
        mime_type: &str,
        display_name: &str,
        cancel: &CancellationToken,
        progress: Option<&(dyn Fn(u64, u64) + Send + Sync)>,
    ) -> GeminiResult<FileRef> {
        let size = tokio::fs::metadata(path).await?.len();

        let upload_url = self
            .initiate(credential, size, mime_type, display_name, cancel)
            .await?;
        debug!(display_name, size, "Upload session opened");

        let file_ref = self
            .transfer(&upload_url, path, size, cancel, progress)
            .await?;

        info!(name = %file_ref.name, size, "Upload finished");
        Ok(file_ref)
    }

    /// Poll the file status endpoint until the file is `ACTIVE`.
    ///
    /// The wait bound scales with size: `45s + 18s` per 10 MB, capped at
    /// 15 minutes. `FAILED` is terminal; any other state keeps polling.
    pub async fn wait_ready(
        &self,
        credential: &str,
        name: &str,
        size_bytes: u64,
        cancel: &CancellationToken,
    ) -> GeminiResult<()> {
        let max_wait = max_wait_for_size(size_bytes);
        let started = Instant::now();
        let url = format!(
            "{}/v1beta/{}?key={}",
            self.config.base_url, name, credential
        );

        loop {
            if cancel.is_cancelled() {
                return Err(GeminiError::Cancelled);
            }

            let status = self.poll_status(&url, cancel).await;
            match status {
                Ok(state) if state.state == "ACTIVE" => {
                    debug!(name, waited_ms = started.elapsed().as_millis() as u64, "File active");
                    return Ok(());
                }
                Ok(state) if state.state == "FAILED" => {
                    let message = state
                        .error
                        .map(|e| e.message)
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "file processing failed".to_string());
                    return Err(GeminiError::Terminal(message));
                }
                Ok(state) => {
                    debug!(name, state = %state.state, "File still processing");
                }
                Err(e) if e.is_transient() => {
                    warn!(name, error = %e, "Status poll failed, will retry");
                }
                Err(e) => return Err(e),
            }

            if started.elapsed() >= max_wait {
                return Err(GeminiError::UploadTimedOut {
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn poll_status(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> GeminiResult<FileStatus> {
        let request = self
            .client
            .get(url)
            .timeout(self.config.poll_timeout)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(GeminiError::Cancelled),
            res = request => res.map_err(GeminiError::from_reqwest)?,
        };

        let status = response.status();
        let body = response.text().await.map_err(GeminiError::from_reqwest)?;
        if !status.is_success() {
            return Err(GeminiError::from_status(status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| GeminiError::BadResponse(format!("file status: {}", e)))
    }

    /// Open the upload session; returns the session URL.
    async fn initiate(
        &self,
        credential: &str,
        size: u64,
        mime_type: &str,
        display_name: &str,
        cancel: &CancellationToken,
    ) -> GeminiResult<String> {
        let url = format!(
            "{}/upload/v1beta/files?key={}",
            self.config.base_url, credential
        );
        let body = serde_json::to_vec(&InitiateBody {
            file: InitiateFile { display_name },
        })
        .map_err(|e| GeminiError::BadResponse(e.to_string()))?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let request = self
                .client
                .post(&url)
                .timeout(self.config.init_timeout)
                .header("X-Goog-Upload-Protocol", "resumable")
                .header("X-Goog-Upload-Command", "start")
                .header("X-Goog-Upload-Header-Content-Length", size.to_string())
                .header("X-Goog-Upload-Header-Content-Type", mime_type)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send();

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(GeminiError::Cancelled),
                res = request => res,
            };

            match result {
                Ok(response) if response.status().is_success() => {
                    let upload_url = response
                        .headers()
                        .get("X-Goog-Upload-URL")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());
                    return upload_url.ok_or_else(|| {
                        GeminiError::BadResponse(
                            "initiate response missing X-Goog-Upload-URL header".to_string(),
                        )
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    let err = GeminiError::from_status(status, &text);
                    if err.is_transient() && attempt < MAX_REQUEST_ATTEMPTS {
                        warn!(attempt, error = %err, "Upload initiate failed, retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    let err = GeminiError::from_reqwest(e);
                    if attempt < MAX_REQUEST_ATTEMPTS {
                        warn!(attempt, error = %err, "Upload initiate failed, retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Windowed transfer: up to 64 MB per PUT, read from disk one window
    /// at a time, `upload` command on every window but the last, which
    /// finalizes. A file that fits one window becomes a single
    /// `(offset 0, "upload, finalize")` segment.
    async fn transfer(
        &self,
        upload_url: &str,
        path: &Path,
        size: u64,
        cancel: &CancellationToken,
        progress: Option<&(dyn Fn(u64, u64) + Send + Sync)>,
    ) -> GeminiResult<FileRef> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut offset = 0u64;
        let mut final_ref = None;

        loop {
            let window_len = TRANSFER_WINDOW_BYTES.min(size - offset) as usize;
            let mut buffer = vec![0u8; window_len];
            file.read_exact(&mut buffer).await?;
            let payload = Bytes::from(buffer);

            let is_last = offset + window_len as u64 >= size;
            let result = self
                .put_window(upload_url, payload, offset, is_last, cancel)
                .await?;

            offset += window_len as u64;
            if let Some(progress) = progress {
                progress(offset, size);
            }
            debug!(offset, size, is_last, "Transferred upload window");

            if is_last {
                final_ref = result;
                break;
            }
        }

        final_ref.ok_or_else(|| {
            GeminiError::BadResponse("finalize response missing file body".to_string())
        })
    }

    /// PUT one window. Returns the parsed file reference on the finalizing
    /// window, `None` otherwise. Transient failures are retried; the
    /// payload is a cheaply-cloneable `Bytes`.
    async fn put_window(
        &self,
        upload_url: &str,
        payload: Bytes,
        offset: u64,
        finalize: bool,
        cancel: &CancellationToken,
    ) -> GeminiResult<Option<FileRef>> {
        let command = if finalize { "upload, finalize" } else { "upload" };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let request = self
                .client
                .put(upload_url)
                .timeout(self.config.transfer_timeout)
                .header("X-Goog-Upload-Offset", offset.to_string())
                .header("X-Goog-Upload-Command", command)
                .header("Content-Length", payload.len().to_string())
                .body(payload.clone())
                .send();

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(GeminiError::Cancelled),
                res = request => res,
            };

            let err = match result {
                Ok(response) if response.status().is_success() => {
                    if !finalize {
                        return Ok(None);
                    }
                    let body = response.text().await.map_err(GeminiError::from_reqwest)?;
                    let parsed: FinalizeResponse = serde_json::from_str(&body).map_err(|e| {
                        GeminiError::BadResponse(format!("finalize body: {}", e))
                    })?;
                    return Ok(Some(FileRef {
                        uri: parsed.file.uri,
                        name: parsed.file.name,
                    }));
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    GeminiError::from_status(status, &text)
                }
                Err(e) => GeminiError::from_reqwest(e),
            };

            if err.is_transient() && attempt < MAX_REQUEST_ATTEMPTS {
                warn!(attempt, offset, error = %err, "Upload window failed, retrying");
                tokio::time::sleep(backoff(attempt)).await;
                continue;
            }
            return Err(err);
        }
    }
}

/// Wait bound for the status poll: `min(15 min, 45s + ceil(MB/10) * 18s)`.
pub fn max_wait_for_size(size_bytes: u64) -> Duration {
    let size_mb = size_bytes.div_ceil(1024 * 1024);
    let scaled = 45 + size_mb.div_ceil(10) * 18;
    Duration::from_secs(scaled.min(15 * 60))
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(500u64.saturating_mul(2u64.saturating_pow(attempt - 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_bound_scales_with_size_and_caps() {
        // 10 MB: 45 + 18 = 63s.
        assert_eq!(max_wait_for_size(10 * 1024 * 1024), Duration::from_secs(63));
        // 100 MB: 45 + 180 = 225s.
        assert_eq!(
            max_wait_for_size(100 * 1024 * 1024),
            Duration::from_secs(225)
        );
        // 1 GB would exceed the cap.
        assert_eq!(
            max_wait_for_size(1024 * 1024 * 1024),
            Duration::from_secs(900)
        );
        // Empty file still gets the base allowance.
        assert_eq!(max_wait_for_size(0), Duration::from_secs(45));
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_millis(500));
        assert_eq!(backoff(2), Duration::from_millis(1000));
        assert_eq!(backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn initiate_body_uses_display_name_key() {
        let body = InitiateBody {
            file: InitiateFile {
                display_name: "lecture.mp4",
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["file"]["displayName"], "lecture.mp4");
    }

    #[test]
    fn file_status_tolerates_missing_fields() {
        let status: FileStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status.state, "");
        assert!(status.error.is_none());

        let status: FileStatus =
            serde_json::from_str(r#"{"state":"FAILED","error":{"message":"corrupt"}}"#).unwrap();
        assert_eq!(status.state, "FAILED");
        assert_eq!(status.error.unwrap().message, "corrupt");
    }
}
