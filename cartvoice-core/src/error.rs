//! Error types for the Cartvoice core library.
//!
//! Uses `thiserror` for public API error types. The top-level [`CartError`]
//! mirrors the request-level taxonomy (authentication, validation,
//! configuration, extraction) so the gateway can map each variant to an
//! HTTP status without inspecting messages.

/// Top-level error type for the Cartvoice core library.
#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {message}")]
    Extraction { message: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CartError {
    pub fn authentication(message: impl Into<String>) -> Self {
        CartError::Authentication {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CartError::Validation {
            message: message.into(),
        }
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        CartError::Extraction {
            message: message.into(),
        }
    }

    /// Short, stable label used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CartError::Authentication { .. } => "authentication",
            CartError::Validation { .. } => "validation",
            CartError::PayloadTooLarge { .. } => "payload_too_large",
            CartError::Config(_) => "configuration",
            CartError::Extraction { .. } => "extraction",
            CartError::Llm(_) => "llm",
            CartError::Io(_) => "io",
            CartError::Serialization(_) => "serialization",
        }
    }
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },
}

/// A type alias for results using the top-level `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_authentication() {
        let err = CartError::authentication("missing session");
        assert_eq!(err.to_string(), "Authentication error: missing session");
        assert_eq!(err.kind(), "authentication");
    }

    #[test]
    fn test_error_display_payload_too_large() {
        let err = CartError::PayloadTooLarge { limit: 65536 };
        assert_eq!(err.to_string(), "Request body exceeds 65536 bytes");
        assert_eq!(err.kind(), "payload_too_large");
    }

    #[test]
    fn test_error_display_config() {
        let err = CartError::Config(ConfigError::EnvVarMissing {
            var: "GEMINI_API_KEY".into(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Environment variable not set: GEMINI_API_KEY"
        );
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_error_display_llm() {
        let err = CartError::Llm(LlmError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: CartError = serde_err.into();
        assert!(matches!(err, CartError::Serialization(_)));
    }

    #[test]
    fn test_llm_error_variants() {
        let err = LlmError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(err.to_string(), "Rate limited by provider, retry after 30s");

        let err = LlmError::Timeout { timeout_secs: 120 };
        assert_eq!(err.to_string(), "Request timed out after 120s");
    }
}
