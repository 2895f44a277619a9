use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl AiError {
    /// Whether a retry is worth attempting. Timeouts, connection failures,
    /// rate limits, 5xx, and malformed model output all tend to resolve on
    /// resend; other API errors do not.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Timeout | AiError::Connect(_) | AiError::RateLimited { .. } => true,
            AiError::Api { status, .. } => *status >= 500,
            AiError::InvalidResponse(_) => true,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AiError::Timeout
        } else if err.is_connect() {
            AiError::Connect(err.to_string())
        } else {
            AiError::InvalidResponse(err.to_string())
        }
    }
}
