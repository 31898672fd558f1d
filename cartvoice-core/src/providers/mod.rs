//! LLM provider implementations.
//!
//! Provides the Google Gemini implementation of [`StructuredLlm`].
//! Use `create_provider()` to instantiate the provider named in config.

pub mod gemini;

use crate::brain::StructuredLlm;
use crate::config::LlmConfig;
use crate::error::{CartError, ConfigError};
use std::sync::Arc;

pub use gemini::GeminiProvider;

/// Create the structured-output provider named by `config.provider`.
///
/// Fails with a configuration error when the provider is unknown or its
/// credential is not set.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn StructuredLlm>, CartError> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiProvider::new(config)?)),
        other => Err(CartError::Config(ConfigError::Invalid {
            message: format!("unsupported LLM provider '{}'", other),
        })),
    }
}
