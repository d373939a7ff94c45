//! Error types for the model adapter.

use thiserror::Error;

/// Errors raised by the validator-model adapter.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Transport-level failure (connect, TLS, HTTP status).
    #[error("model transport failed: {0}")]
    Transport(String),

    /// The call exceeded its deadline.
    #[error("model call timed out after {0} ms")]
    Timeout(u64),

    /// The model returned no usable content.
    #[error("model returned an empty reply")]
    EmptyReply,

    /// The reply envelope could not be decoded.
    #[error("model reply envelope malformed: {0}")]
    Envelope(String),

    /// The adapter is not configured (missing API key or base URL).
    #[error("model adapter not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // The concrete deadline is reported by the caller's settings.
            ModelError::Timeout(0)
        } else {
            ModelError::Transport(err.to_string())
        }
    }
}
