use thiserror::Error;

/// Error taxonomy for the inference pipeline.
///
/// Gateway retries `Transport` and `RateLimited` internally; the cascade
/// swallows per-source errors; only `main` converts the rest into a
/// degraded (never failed) result.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("validation failure: {0}")]
    ValidationFailure(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl InferenceError {
    /// Retryable at the gateway level. Parse and validation failures are
    /// not retried here; re-issuing the model call is a gateway decision.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InferenceError::Transport(_) | InferenceError::RateLimited(_)
        )
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        InferenceError::Transport(e.to_string())
    }
}
