use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("parse error: {0}")]
    Parse(String),

    /// Circuit open, deadline exceeded, or provider outage. Turns answer
    /// with the localized fallback when they see this.
    #[error("LLM unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    /// Rate-limit style errors are non-retryable but still count as
    /// failures for the circuit breaker.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited)
            || matches!(self, Self::Api { status, .. } if *status == 429)
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
