//! Error taxonomy for the analysis pipeline.
//!
//! The one variant callers must be able to tell apart is [`ExtractError::RateLimited`]:
//! it is never retried locally and maps to HTTP 503 at the API layer so clients
//! know to try again later instead of treating the document as unprocessable.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The model service rejected the call for quota/rate reasons.
    /// Must propagate undisturbed through every wrapping layer.
    #[error("model service is busy (rate limit exceeded), try again later")]
    RateLimited,

    /// A remote call exceeded the configured overall timeout.
    /// Counts as a failed attempt subject to the normal retry policy.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// File upload to the model service failed.
    #[error("file upload failed: {0}")]
    Upload(String),

    /// The generate call itself failed (network, 5xx, empty candidates).
    #[error("model request failed: {0}")]
    Request(String),

    /// The model's response could not be parsed as JSON even after repair.
    #[error("model response is not valid JSON: {0}")]
    MalformedResponse(String),

    /// The retry budget for a single remote call was exhausted.
    #[error("remote call failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Every strategy, including the final fallback, raised.
    #[error("all extraction strategies exhausted: {0}")]
    Exhausted(String),

    /// The source document could not be read at all.
    #[error("failed to read document: {0}")]
    Document(String),
}

impl ExtractError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ExtractError::RateLimited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_distinguishable() {
        assert!(ExtractError::RateLimited.is_rate_limited());
        assert!(!ExtractError::Request("boom".into()).is_rate_limited());
        assert!(!ExtractError::Timeout(Duration::from_secs(1)).is_rate_limited());
    }
}
