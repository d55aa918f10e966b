use thiserror::Error;

/// Normalized failure modes for any LLM Client operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request timed out")]
    Timeout,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no api key configured")]
    MissingApiKey,
}

impl LLMError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LLMError::Timeout) || matches!(self, LLMError::Http(e) if e.is_timeout())
    }
}
