//! Generation error types.

use std::time::Duration;
use thiserror::Error;

/// Failure of an external generation call.
///
/// Every variant is recoverable: the scorer and compactor route all of them
/// to their deterministic fallback.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("No generator configured")]
    Unavailable,
}

impl From<serde_json::Error> for GenerationError {
    fn from(e: serde_json::Error) -> Self {
        GenerationError::Malformed(e.to_string())
    }
}
