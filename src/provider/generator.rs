use super::GenerationError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Request for free-form text generation.
#[derive(Debug, Clone)]
pub struct TextRequest {
    /// Model override for compaction calls. `None` lets the runtime pick.
    pub model: Option<String>,
    pub system: String,
    pub prompt: String,
    pub max_tokens: Option<u32>,
}

/// Request for a typed record matching `schema`.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub model: Option<String>,
    pub instruction: String,
    pub transcript: String,
    /// JSON schema of the expected record.
    pub schema: serde_json::Value,
}

/// Text generation capability supplied by the surrounding agent runtime.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, request: TextRequest) -> Result<String, GenerationError>;
}

/// Structured generation capability supplied by the surrounding agent runtime.
///
/// Implementations return the raw JSON record; callers validate it into their
/// own types and treat a mismatch as [`GenerationError::Malformed`].
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn generate_structured(
        &self,
        request: StructuredRequest,
    ) -> Result<serde_json::Value, GenerationError>;
}

/// Race a generation call against a deadline and a cancellation token.
pub async fn with_deadline<T, F>(
    call: F,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<T, GenerationError>
where
    F: Future<Output = Result<T, GenerationError>>,
{
    tokio::select! {
        () = cancel.cancelled() => Err(GenerationError::Cancelled),
        result = tokio::time::timeout(deadline, call) => {
            result.unwrap_or(Err(GenerationError::Timeout(deadline)))
        }
    }
}
