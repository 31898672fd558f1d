//! Conversation transcript logging.
//!
//! Sends conversation turns to an external transcript store so the front end
//! can show history. Logging is best-effort: delivery failures are logged and
//! swallowed, never returned to the caller.

use crate::config::TranscriptConfig;
use crate::types::{Speaker, TranscriptEntry};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Number of leading characters that identify a turn for deduplication.
const DEDUPE_PREFIX_CHARS: usize = 50;

/// Destination for transcript entries.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn send(&self, entry: &TranscriptEntry) -> Result<(), String>;
}

/// Posts entries as JSON to `{base_url}/addTranscript`.
pub struct HttpTranscriptSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriptSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/addTranscript", base_url.trim_end_matches('/')),
        })
    }

    pub fn from_config(config: &TranscriptConfig) -> Result<Self, reqwest::Error> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TranscriptSink for HttpTranscriptSink {
    async fn send(&self, entry: &TranscriptEntry) -> Result<(), String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(entry)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, body));
        }
        Ok(())
    }
}

/// Collects entries in memory. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryTranscriptSink {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl MemoryTranscriptSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl TranscriptSink for MemoryTranscriptSink {
    async fn send(&self, entry: &TranscriptEntry) -> Result<(), String> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}

/// Logs the turns of one voice session, skipping repeats.
pub struct TranscriptLogger {
    session_id: String,
    sink: Arc<dyn TranscriptSink>,
    seen: Mutex<HashSet<String>>,
}

impl TranscriptLogger {
    pub fn new(session_id: impl Into<String>, sink: Arc<dyn TranscriptSink>) -> Self {
        Self {
            session_id: session_id.into(),
            sink,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Log one conversation turn.
    ///
    /// `system` and `function` turns and empty content are skipped, as is any
    /// turn whose role and leading text were already logged. Returns whether
    /// the turn was sent.
    pub async fn log_turn(&self, role: &str, content: &str, confidence: Option<f64>) -> bool {
        if matches!(role, "system" | "function") || content.is_empty() {
            return false;
        }

        let prefix: String = content.chars().take(DEDUPE_PREFIX_CHARS).collect();
        let key = format!("{}:{}", role, prefix);
        if !self.seen.lock().await.insert(key) {
            debug!(role, "Skipping duplicate transcript turn");
            return false;
        }

        let speaker = if role == "user" {
            Speaker::User
        } else {
            Speaker::Agent
        };
        let entry = TranscriptEntry {
            session_id: self.session_id.clone(),
            speaker,
            text: content.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            confidence,
        };

        match self.sink.send(&entry).await {
            Ok(()) => {
                debug!(session_id = %self.session_id, ?speaker, "Logged transcript turn");
                true
            }
            Err(error) => {
                warn!(session_id = %self.session_id, %error, "Failed to log transcript turn");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl TranscriptSink for FailingSink {
        async fn send(&self, _entry: &TranscriptEntry) -> Result<(), String> {
            Err("HTTP 500".to_string())
        }
    }

    fn logger() -> (TranscriptLogger, Arc<MemoryTranscriptSink>) {
        let sink = Arc::new(MemoryTranscriptSink::new());
        let logger = TranscriptLogger::new("session-1", sink.clone());
        (logger, sink)
    }

    #[tokio::test]
    async fn test_logs_user_and_agent_turns() {
        let (logger, sink) = logger();
        assert!(logger.log_turn("user", "show me boots", Some(0.9)).await);
        assert!(logger.log_turn("assistant", "Here are three boots", None).await);

        let entries = sink.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, Speaker::User);
        assert_eq!(entries[0].confidence, Some(0.9));
        assert_eq!(entries[1].speaker, Speaker::Agent);
        assert_eq!(entries[1].session_id, "session-1");
        assert!(entries[1].timestamp > 0);
    }

    #[tokio::test]
    async fn test_skips_system_function_and_empty() {
        let (logger, sink) = logger();
        assert!(!logger.log_turn("system", "You are a helpful assistant", None).await);
        assert!(!logger.log_turn("function", "{\"results\": []}", None).await);
        assert!(!logger.log_turn("user", "", None).await);
        assert!(sink.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_dedupes_on_role_and_prefix() {
        let (logger, sink) = logger();
        let long = "a".repeat(60);
        let same_prefix = format!("{}{}", "a".repeat(50), "different tail");

        assert!(logger.log_turn("user", &long, None).await);
        assert!(!logger.log_turn("user", &same_prefix, None).await);
        // Same text from another role is a different turn.
        assert!(logger.log_turn("assistant", &long, None).await);
        assert_eq!(sink.entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let logger = TranscriptLogger::new("s", Arc::new(FailingSink));
        assert!(!logger.log_turn("user", "hello", None).await);
    }

    #[test]
    fn test_http_sink_endpoint() {
        let sink =
            HttpTranscriptSink::new("https://example.convex.site/", Duration::from_secs(5)).unwrap();
        assert_eq!(sink.endpoint(), "https://example.convex.site/addTranscript");
    }

    #[tokio::test]
    async fn test_http_sink_posts_entry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/addTranscript")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "sessionId": "s-http",
                "speaker": "user",
                "text": "save the first one"
            })))
            .with_status(200)
            .create_async()
            .await;

        let sink = HttpTranscriptSink::new(&server.url(), Duration::from_secs(5)).unwrap();
        let logger = TranscriptLogger::new("s-http", Arc::new(sink));
        assert!(logger.log_turn("user", "save the first one", None).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_sink_non_200_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/addTranscript")
            .with_status(400)
            .with_body("bad session")
            .create_async()
            .await;

        let sink = HttpTranscriptSink::new(&server.url(), Duration::from_secs(5)).unwrap();
        let entry = TranscriptEntry {
            session_id: "s".into(),
            speaker: Speaker::User,
            text: "hi".into(),
            timestamp: 1,
            confidence: None,
        };
        let err = sink.send(&entry).await.unwrap_err();
        assert!(err.contains("bad session"));
    }
}
