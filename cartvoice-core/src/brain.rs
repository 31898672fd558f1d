//! Structured-output LLM interface.
//!
//! Extraction and command interpretation both treat the hosted model as an
//! opaque capability: send a prompt plus a response schema, get back JSON text.
//! [`StructuredLlm`] is that seam; [`MockStructuredLlm`] returns canned text
//! for tests and offline runs.

use crate::error::LlmError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A single prompt constrained to a JSON response schema.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredRequest {
    pub prompt: String,
    /// Response schema in the provider's schema dialect.
    pub schema: Value,
    /// Overrides the provider's configured temperature when set.
    pub temperature: Option<f32>,
}

impl StructuredRequest {
    pub fn new(prompt: impl Into<String>, schema: Value) -> Self {
        Self {
            prompt: prompt.into(),
            schema,
            temperature: None,
        }
    }
}

/// A model that can answer a prompt with JSON matching a declared schema.
#[async_trait]
pub trait StructuredLlm: Send + Sync {
    /// Run the request and return the raw response text (expected to be JSON).
    async fn generate_json(&self, request: StructuredRequest) -> Result<String, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// A mock model for testing that replays queued responses.
///
/// When the queue is empty it answers with `{}`, which callers treat as a
/// malformed response.
pub struct MockStructuredLlm {
    responses: Mutex<Vec<String>>,
    fail_with: Option<String>,
    calls: AtomicUsize,
    last_request: Mutex<Option<StructuredRequest>>,
}

impl MockStructuredLlm {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fail_with: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Create a mock that always returns the given text.
    ///
    /// Queues multiple copies of the response so it can handle multiple calls.
    pub fn with_response(text: &str) -> Self {
        let mock = Self::new();
        for _ in 0..20 {
            mock.queue_response(text);
        }
        mock
    }

    /// Create a mock whose every call fails with `LlmError::ApiRequest`.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new()
        }
    }

    /// Queue a response to be returned by the next call.
    pub fn queue_response(&self, text: &str) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(text.to_string());
        }
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent request, if any.
    pub fn last_request(&self) -> Option<StructuredRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }
}

impl Default for MockStructuredLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StructuredLlm for MockStructuredLlm {
    async fn generate_json(&self, request: StructuredRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request);
        }
        if let Some(message) = &self.fail_with {
            return Err(LlmError::ApiRequest {
                message: message.clone(),
            });
        }
        let next = self.responses.lock().ok().and_then(|mut responses| {
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        });
        Ok(next.unwrap_or_else(|| "{}".to_string()))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replays_in_order() {
        let mock = MockStructuredLlm::new();
        mock.queue_response("first");
        mock.queue_response("second");

        let req = StructuredRequest::new("p", serde_json::json!({}));
        assert_eq!(mock.generate_json(req.clone()).await.unwrap(), "first");
        assert_eq!(mock.generate_json(req.clone()).await.unwrap(), "second");
        assert_eq!(mock.generate_json(req).await.unwrap(), "{}");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_records_last_request() {
        let mock = MockStructuredLlm::with_response("{}");
        let req = StructuredRequest::new("hello", serde_json::json!({"type": "OBJECT"}));
        mock.generate_json(req).await.unwrap();
        let last = mock.last_request().unwrap();
        assert_eq!(last.prompt, "hello");
        assert_eq!(last.schema["type"], "OBJECT");
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let mock = MockStructuredLlm::failing("boom");
        let err = mock
            .generate_json(StructuredRequest::new("p", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ApiRequest { .. }));
        assert_eq!(mock.call_count(), 1);
    }
}
