//! Google Gemini API provider implementation.
//!
//! Implements [`StructuredLlm`] against the native Gemini `generateContent`
//! endpoint using structured output: the request sets
//! `responseMimeType = "application/json"` and a `responseSchema`, and the
//! model's text parts are returned as the JSON document.
//!
//! Key differences from OpenAI-compatible APIs:
//! - Auth via `?key=API_KEY` query parameter (not header-based)
//! - Roles are `"user"` / `"model"` (not `"assistant"`)
//! - Schemas use an OpenAPI subset; unsupported keywords are rejected

use crate::brain::{StructuredLlm, StructuredRequest};
use crate::config::LlmConfig;
use crate::error::{CartError, LlmError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// The default Google Gemini API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const REQUEST_TIMEOUT_SECS: u64 = 120;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// How authentication is performed against the Gemini API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GeminiAuthMode {
    /// Traditional API key via `?key=` query parameter.
    ApiKey,
    /// OAuth Bearer token via `Authorization` header.
    Bearer,
}

/// Google Gemini API provider.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    auth_mode: GeminiAuthMode,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("auth_mode", &self.auth_mode)
            .finish()
    }
}

impl GeminiProvider {
    /// Create a new Gemini provider from configuration.
    ///
    /// Reads the API key from `config.api_key` or the environment variable named
    /// by `config.api_key_env`. A missing key is a configuration error.
    pub fn new(config: &LlmConfig) -> Result<Self, CartError> {
        let api_key = config.resolve_api_key()?;
        Ok(Self::new_with_key(config, api_key)?)
    }

    /// Create a new Gemini provider with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        let auth_mode = if config.auth_method == "oauth" {
            GeminiAuthMode::Bearer
        } else {
            GeminiAuthMode::ApiKey
        };

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            auth_mode,
        })
    }

    /// Build the JSON request body for a structured-output call.
    fn build_request_body(&self, request: &StructuredRequest) -> Value {
        serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": request.prompt}],
            }],
            "generationConfig": {
                "temperature": request.temperature.unwrap_or(self.temperature),
                "maxOutputTokens": self.max_tokens,
                "responseMimeType": "application/json",
                "responseSchema": Self::sanitize_schema(&request.schema),
            },
        })
    }

    /// Strip schema keywords the Gemini API rejects.
    fn sanitize_schema(schema: &Value) -> Value {
        const ALLOWED_KEYS: &[&str] = &[
            "type",
            "description",
            "properties",
            "required",
            "enum",
            "items",
            "format",
            "nullable",
            "minimum",
            "maximum",
        ];

        match schema {
            Value::Object(map) => {
                let mut clean = serde_json::Map::new();
                for (key, value) in map {
                    if !ALLOWED_KEYS.contains(&key.as_str()) {
                        continue;
                    }
                    let cleaned_value = match key.as_str() {
                        "properties" => match value {
                            Value::Object(props) => Value::Object(
                                props
                                    .iter()
                                    .map(|(k, v)| (k.clone(), Self::sanitize_schema(v)))
                                    .collect(),
                            ),
                            other => other.clone(),
                        },
                        "items" => Self::sanitize_schema(value),
                        _ => value.clone(),
                    };
                    clean.insert(key.clone(), cleaned_value);
                }
                Value::Object(clean)
            }
            other => other.clone(),
        }
    }

    /// Pull the generated text out of a `generateContent` response.
    fn parse_response(body: &Value) -> Result<String, LlmError> {
        let candidates = match body["candidates"].as_array() {
            Some(c) if !c.is_empty() => c,
            _ => {
                let message = match body["promptFeedback"]["blockReason"].as_str() {
                    Some(reason) => format!("Prompt blocked by Gemini: {}", reason),
                    None => "Missing 'candidates' array in response".to_string(),
                };
                return Err(LlmError::ResponseParse { message });
            }
        };

        let candidate = &candidates[0];
        let parts = candidate["content"]["parts"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'parts' array in candidate content".to_string(),
            })?;

        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect();

        if text.trim().is_empty() {
            let finish_reason = candidate["finishReason"].as_str().unwrap_or("unknown");
            return Err(LlmError::ResponseParse {
                message: format!("Empty response text (finish reason: {})", finish_reason),
            });
        }

        if let Some(reason) = candidate["finishReason"].as_str()
            && reason != "STOP"
        {
            warn!(finish_reason = reason, "Gemini response finished early");
        }

        Ok(text)
    }

    /// Map an HTTP status code to the appropriate `LlmError`.
    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 30,
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {} from Gemini API: {}", status, body_text),
            },
        }
    }

    /// Map a transport-level failure to the appropriate `LlmError`.
    fn map_send_error(err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout {
                timeout_secs: REQUEST_TIMEOUT_SECS,
            }
        } else if err.is_connect() {
            LlmError::Connection {
                message: format!("Could not reach Gemini API: {}", err),
            }
        } else {
            LlmError::ApiRequest {
                message: format!("Request to Gemini API failed: {}", err),
            }
        }
    }

    /// Build the endpoint URL for a Gemini API call.
    ///
    /// In `ApiKey` mode, the key is appended as a `?key=` query parameter.
    /// In `Bearer` mode, the URL contains no key (auth is via header).
    fn endpoint_url(&self, method: &str) -> String {
        match self.auth_mode {
            GeminiAuthMode::ApiKey => format!(
                "{}/models/{}:{}?key={}",
                self.base_url, self.model, method, self.api_key
            ),
            GeminiAuthMode::Bearer => {
                format!("{}/models/{}:{}", self.base_url, self.model, method)
            }
        }
    }

    /// Build a request with the appropriate auth header/params.
    fn build_authed_request(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(url)
            .header("content-type", "application/json");
        match self.auth_mode {
            GeminiAuthMode::ApiKey => builder,
            GeminiAuthMode::Bearer => {
                builder.header("Authorization", format!("Bearer {}", self.api_key))
            }
        }
    }
}

#[async_trait]
impl StructuredLlm for GeminiProvider {
    async fn generate_json(&self, request: StructuredRequest) -> Result<String, LlmError> {
        let body = self.build_request_body(&request);
        let url = self.endpoint_url("generateContent");

        debug!(
            model = self.model.as_str(),
            prompt_chars = request.prompt.len(),
            "Sending Gemini structured request"
        );

        let response = self
            .build_authed_request(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| LlmError::ResponseParse {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON in response: {}", e),
            })?;

        Self::parse_response(&response_json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
