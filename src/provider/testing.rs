//! Scripted generators for tests.

use super::{GenerationError, StructuredGenerator, StructuredRequest, TextGenerator, TextRequest};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Returns the same text for every request and records the prompts it saw.
pub struct FixedText {
    pub response: String,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl FixedText {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FixedText {
    async fn generate_text(&self, request: TextRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt);
        Ok(self.response.clone())
    }
}

/// Returns the same JSON record for every request.
pub struct FixedRecord {
    pub record: serde_json::Value,
    pub calls: AtomicUsize,
}

impl FixedRecord {
    pub fn new(record: serde_json::Value) -> Self {
        Self {
            record,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StructuredGenerator for FixedRecord {
    async fn generate_structured(
        &self,
        _request: StructuredRequest,
    ) -> Result<serde_json::Value, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.record.clone())
    }
}

/// Fails every request with a provider error.
pub struct Failing;

#[async_trait]
impl TextGenerator for Failing {
    async fn generate_text(&self, _request: TextRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Provider("HTTP 500: upstream unavailable".to_string()))
    }
}

#[async_trait]
impl StructuredGenerator for Failing {
    async fn generate_structured(
        &self,
        _request: StructuredRequest,
    ) -> Result<serde_json::Value, GenerationError> {
        Err(GenerationError::Provider("HTTP 500: upstream unavailable".to_string()))
    }
}

/// Never answers within any reasonable deadline.
pub struct Stalled;

#[async_trait]
impl TextGenerator for Stalled {
    async fn generate_text(&self, _request: TextRequest) -> Result<String, GenerationError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("SUMMARY: too late\nKEY_POINTS:\n- too late".to_string())
    }
}

#[async_trait]
impl StructuredGenerator for Stalled {
    async fn generate_structured(
        &self,
        _request: StructuredRequest,
    ) -> Result<serde_json::Value, GenerationError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(serde_json::Value::Null)
    }
}
