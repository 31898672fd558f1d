//! Preference extraction.
//!
//! Turns a free-form shopping transcript into validated [`PreferenceRecord`]s
//! with a single schema-constrained model call. Priority scoring is left to
//! the model; only the shape of its answer is enforced here.

mod parse;
pub mod prompt;

pub(crate) use parse::parse_json;
pub use parse::{parse_preference_values, parse_preferences};

use crate::brain::{StructuredLlm, StructuredRequest};
use crate::error::{CartError, Result};
use crate::types::PreferenceRecord;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Extracts shopping preferences from transcripts via a structured-output model.
#[derive(Clone)]
pub struct PreferenceExtractor {
    llm: Arc<dyn StructuredLlm>,
}

impl std::fmt::Debug for PreferenceExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceExtractor")
            .field("model", &self.llm.model_name())
            .finish()
    }
}

impl PreferenceExtractor {
    pub fn new(llm: Arc<dyn StructuredLlm>) -> Self {
        Self { llm }
    }

    /// Extract preferences from `transcript`, using `conversation_history` as context.
    ///
    /// Returns zero or more records in extraction order, or an error; never a
    /// partial result.
    pub async fn extract(
        &self,
        transcript: &str,
        conversation_history: Option<&str>,
    ) -> Result<Vec<PreferenceRecord>> {
        let raw = self.generate(transcript, conversation_history).await?;
        let preferences = parse_preferences(&raw)?;

        info!(count = preferences.len(), "Extracted preferences");
        Ok(preferences)
    }

    /// Like [`extract`](Self::extract), but returns each validated record as
    /// the model wrote it, so callers can pass the array through unchanged.
    pub async fn extract_verbatim(
        &self,
        transcript: &str,
        conversation_history: Option<&str>,
    ) -> Result<Vec<Value>> {
        let raw = self.generate(transcript, conversation_history).await?;
        let preferences = parse_preference_values(&raw)?;

        info!(count = preferences.len(), "Extracted preferences");
        Ok(preferences)
    }

    async fn generate(&self, transcript: &str, conversation_history: Option<&str>) -> Result<String> {
        if transcript.is_empty() {
            return Err(CartError::validation("Transcript is required"));
        }

        let request = StructuredRequest::new(
            prompt::preference_prompt(transcript, conversation_history),
            prompt::preference_schema(),
        );

        debug!(
            model = self.llm.model_name(),
            transcript_chars = transcript.len(),
            has_history = conversation_history.is_some(),
            "Extracting preferences"
        );

        Ok(self.llm.generate_json(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockStructuredLlm;
    use crate::error::LlmError;
    use crate::types::PreferenceCategory;

    fn extractor_with(mock: Arc<MockStructuredLlm>) -> PreferenceExtractor {
        PreferenceExtractor::new(mock)
    }

    #[tokio::test]
    async fn test_extract_returns_records_unchanged() {
        let mock = Arc::new(MockStructuredLlm::with_response(
            r#"{"preferences":[
                {"category":"material","tag":"leather","value":"full-grain","priority":9,"productContext":"boots"},
                {"category":"price","tag":"under $50","priority":8}
            ]}"#,
        ));
        let extractor = extractor_with(mock.clone());

        let records = extractor
            .extract("I really need leather boots under fifty dollars", None)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].category, PreferenceCategory::Material);
        assert_eq!(records[0].value.as_deref(), Some("full-grain"));
        assert_eq!(records[0].product_context.as_deref(), Some("boots"));
        assert_eq!(records[1].priority, 8);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_extract_sends_prompt_and_schema() {
        let mock = Arc::new(MockStructuredLlm::with_response(r#"{"preferences":[]}"#));
        let extractor = extractor_with(mock.clone());

        extractor
            .extract("something in navy", Some("user: show me jackets"))
            .await
            .unwrap();

        let request = mock.last_request().unwrap();
        assert!(request.prompt.contains("something in navy"));
        assert!(request.prompt.contains("user: show me jackets"));
        assert_eq!(request.schema["required"][0], "preferences");
    }

    #[tokio::test]
    async fn test_extract_verbatim_passes_records_through() {
        let mock = Arc::new(MockStructuredLlm::with_response(
            r#"{"preferences":[{"category":"size","tag":"medium","value":null,"priority":6,"note":"fits loose"}]}"#,
        ));
        let values = extractor_with(mock)
            .extract_verbatim("medium, they run loose", None)
            .await
            .unwrap();
        assert_eq!(values.len(), 1);
        assert!(values[0]["value"].is_null());
        assert_eq!(values[0]["note"], "fits loose");
    }

    #[tokio::test]
    async fn test_extract_empty_transcript_skips_model() {
        let mock = Arc::new(MockStructuredLlm::new());
        let extractor = extractor_with(mock.clone());

        let err = extractor.extract("", None).await.unwrap_err();
        assert!(matches!(err, CartError::Validation { .. }));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_extract_missing_preferences_key() {
        let mock = Arc::new(MockStructuredLlm::with_response(r#"{"result": "ok"}"#));
        let err = extractor_with(mock)
            .extract("anything", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::Extraction { .. }));
    }

    #[tokio::test]
    async fn test_extract_propagates_llm_failure() {
        let mock = Arc::new(MockStructuredLlm::failing("upstream down"));
        let err = extractor_with(mock)
            .extract("anything", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::Llm(LlmError::ApiRequest { .. })));
    }
}
