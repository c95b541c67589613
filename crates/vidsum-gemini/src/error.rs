//! Gemini adapter error types.
//!
//! Error messages never carry the API key: reqwest errors are stripped of
//! their URL (the key travels as a query parameter) before formatting.

use std::time::Duration;

use thiserror::Error;

pub type GeminiResult<T> = Result<T, GeminiError>;

#[derive(Debug, Error)]
pub enum GeminiError {
    /// 429 or a quota message; the credential should cool down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 5xx or network failure; worth retrying
    #[error("Transient API failure: {0}")]
    Transient(String),

    /// Non-retriable 4xx
    #[error("API rejected request: {0}")]
    Terminal(String),

    /// The model signalled the request exceeds its context window
    #[error("Request too large for the model: {0}")]
    ContextExceeded(String),

    /// Response arrived but did not contain usable content
    #[error("Malformed API response: {0}")]
    BadResponse(String),

    /// Response text did not parse as JSON, even after repair
    #[error("Analysis JSON did not parse: {0}")]
    BadJson(String),

    /// File never reached ACTIVE within the wait bound
    #[error("Upload not ready after {}s", waited.as_secs())]
    UploadTimedOut { waited: Duration },

    /// `acquire` deadline passed with no credential available
    #[error("No analysis capacity available")]
    NoCapacity,

    /// Cooperative cancellation
    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GeminiError {
    /// Map an HTTP status plus response body excerpt onto the taxonomy.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let excerpt = excerpt(body);
        if status.as_u16() == 429 || body.contains("RESOURCE_EXHAUSTED") {
            return GeminiError::RateLimited(excerpt);
        }
        if status.is_server_error() {
            return GeminiError::Transient(format!("{}: {}", status, excerpt));
        }
        if body.contains("exceeds the maximum number of tokens")
            || body.contains("context length")
            || body.contains("too large")
        {
            return GeminiError::ContextExceeded(excerpt);
        }
        GeminiError::Terminal(format!("{}: {}", status, excerpt))
    }

    /// Wrap a transport-level reqwest error, dropping the URL so the key
    /// query parameter never reaches logs or users.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            GeminiError::Transient(format!("request timed out: {}", err))
        } else {
            GeminiError::Transient(err.to_string())
        }
    }

    /// True when the credential that produced this error should cool down.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GeminiError::RateLimited(_))
    }

    /// True when the same call may succeed if simply retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GeminiError::Transient(_) | GeminiError::RateLimited(_) | GeminiError::NoCapacity
        )
    }
}

/// Bounded excerpt of an error body for messages.
fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= 240 {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(240).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_classification() {
        assert!(matches!(
            GeminiError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            GeminiError::RateLimited(_)
        ));
        assert!(matches!(
            GeminiError::from_status(StatusCode::BAD_GATEWAY, "oops"),
            GeminiError::Transient(_)
        ));
        assert!(matches!(
            GeminiError::from_status(StatusCode::BAD_REQUEST, "bad field"),
            GeminiError::Terminal(_)
        ));
        assert!(matches!(
            GeminiError::from_status(
                StatusCode::BAD_REQUEST,
                "request exceeds the maximum number of tokens"
            ),
            GeminiError::ContextExceeded(_)
        ));
        assert!(matches!(
            GeminiError::from_status(StatusCode::OK, "RESOURCE_EXHAUSTED: quota"),
            GeminiError::RateLimited(_)
        ));
    }

    #[test]
    fn retriability() {
        assert!(GeminiError::RateLimited("q".into()).is_rate_limit());
        assert!(GeminiError::Transient("n".into()).is_transient());
        assert!(!GeminiError::Terminal("b".into()).is_transient());
        assert!(!GeminiError::Cancelled.is_transient());
    }

    #[test]
    fn excerpt_is_bounded() {
        let long = "x".repeat(1000);
        let e = GeminiError::from_status(StatusCode::BAD_REQUEST, &long);
        assert!(e.to_string().len() < 300);
    }
}
