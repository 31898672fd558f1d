//! Configuration system for Cartvoice.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from the user config directory (`cartvoice/config.toml`)
//! and/or `.cartvoice/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ConfigError;

/// Default acceptance threshold for voice commands.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.70;

/// Top-level configuration for the Cartvoice service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub commands: CommandsConfig,
    /// Optional conversation transcript logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<TranscriptConfig>,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name. Only "gemini" is supported.
    pub provider: String,
    /// Model identifier (e.g., "gemini-2.0-flash").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Temperature for generation.
    pub temperature: f32,
    /// Authentication method: "api_key" (default) or "oauth".
    #[serde(default)]
    pub auth_method: String,
    /// API key supplied directly (takes precedence over `api_key_env`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 1024,
            temperature: 0.2,
            auth_method: String::new(),
            api_key: None,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    ///
    /// Returns an empty Vec if the config is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.provider != "gemini" {
            warnings.push(format!(
                "provider '{}' is not supported; only 'gemini' is available",
                self.provider
            ));
        }
        if self.max_tokens == 0 {
            warnings.push("max_tokens is 0; every response will be empty".to_string());
        }
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0–2.0",
                self.temperature
            ));
        }
        warnings
    }

    /// Resolve the API key from the inline value or the configured env var.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty()))
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.api_key_env.clone(),
            })
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Session tokens accepted as `Authorization: Bearer <token>`, mapped to user ids.
    ///
    /// Empty means no caller can authenticate.
    #[serde(default)]
    pub session_tokens: HashMap<String, String>,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            session_tokens: HashMap::new(),
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Voice command interpretation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Interpreter backend: "llm" or "keyword".
    pub interpreter: String,
    /// Minimum confidence for a command to be applied.
    pub confidence_threshold: f64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            interpreter: "llm".to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl CommandsConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !matches!(self.interpreter.as_str(), "llm" | "keyword") {
            warnings.push(format!(
                "unknown interpreter '{}'; expected 'llm' or 'keyword'",
                self.interpreter
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            warnings.push(format!(
                "confidence_threshold ({}) is outside 0.0–1.0",
                self.confidence_threshold
            ));
        }
        warnings
    }
}

/// Where conversation turns are logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    pub enabled: bool,
    /// Base URL of the transcript store's HTTP actions (e.g. a `.convex.site` URL).
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_transcript_timeout")]
    pub timeout_secs: u64,
}

fn default_transcript_timeout() -> u64 {
    5
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            timeout_secs: default_transcript_timeout(),
        }
    }
}

impl AppConfig {
    /// Collect warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        warnings.extend(self.commands.validate());
        if let Some(transcript) = &self.transcript
            && transcript.enabled
            && transcript.base_url.is_empty()
        {
            warnings.push("transcript logging is enabled but base_url is empty".to_string());
        }
        warnings
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `CARTVOICE_`)
/// 3. Workspace-local config (`.cartvoice/config.toml`)
/// 4. User config (`<config dir>/cartvoice/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&AppConfig>,
) -> Result<AppConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "cartvoice", "cartvoice") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".cartvoice").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // CARTVOICE_LLM__MODEL, CARTVOICE_SERVER__PORT, ...
    figment = figment.merge(Env::prefixed("CARTVOICE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.llm.provider, "gemini");
        assert_eq!(config.llm.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.server.port, 3000);
        assert!(config.server.session_tokens.is_empty());
        assert_eq!(config.commands.confidence_threshold, 0.70);
        assert!(config.transcript.is_none());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config
            .server
            .session_tokens
            .insert("tok".into(), "user_1".into());
        let toml_str = toml::to_string(&config).unwrap();
        let restored: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.llm.model, config.llm.model);
        assert_eq!(restored.server.session_tokens["tok"], "user_1");
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(None, None).unwrap();
        assert_eq!(config.llm.provider, "gemini");
        assert_eq!(config.commands.interpreter, "llm");
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = AppConfig::default();
        overrides.llm.model = "gemini-2.5-pro".to_string();
        overrides.server.port = 8088;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.llm.model, "gemini-2.5-pro");
        assert_eq!(config.server.port, 8088);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".cartvoice");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            r#"
[llm]
model = "gemini-1.5-flash"

[server]
port = 4100

[server.session_tokens]
"dev-token" = "user_dev"

[commands]
interpreter = "keyword"
confidence_threshold = 0.8

[transcript]
enabled = true
base_url = "https://example.convex.site"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.llm.model, "gemini-1.5-flash");
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.server.session_tokens["dev-token"], "user_dev");
        assert_eq!(config.commands.interpreter, "keyword");
        assert_eq!(config.commands.confidence_threshold, 0.8);
        let transcript = config.transcript.unwrap();
        assert!(transcript.enabled);
        assert_eq!(transcript.timeout_secs, 5);
    }

    #[test]
    fn test_llm_config_validate_defaults_clean() {
        assert!(LlmConfig::default().validate().is_empty());
    }

    #[test]
    fn test_llm_config_validate_bad_values() {
        let config = LlmConfig {
            provider: "openai".into(),
            temperature: 3.5,
            ..LlmConfig::default()
        };
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("openai"));
        assert!(warnings[1].contains("temperature"));
    }

    #[test]
    fn test_commands_config_validate() {
        let config = CommandsConfig {
            interpreter: "regex".into(),
            confidence_threshold: 1.5,
        };
        assert_eq!(config.validate().len(), 2);
        assert!(CommandsConfig::default().validate().is_empty());
    }

    #[test]
    fn test_app_config_validate_transcript_without_url() {
        let config = AppConfig {
            transcript: Some(TranscriptConfig {
                enabled: true,
                ..TranscriptConfig::default()
            }),
            ..AppConfig::default()
        };
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("base_url")));
    }

    #[test]
    fn test_resolve_api_key_inline_wins() {
        let config = LlmConfig {
            api_key: Some("inline-key".into()),
            api_key_env: "CV_TEST_UNUSED_KEY_VAR".into(),
            ..LlmConfig::default()
        };
        assert_eq!(config.resolve_api_key().unwrap(), "inline-key");
    }

    #[test]
    fn test_resolve_api_key_missing() {
        let var = "CV_TEST_MISSING_KEY_VAR";
        // SAFETY: test-only env var manipulation
        unsafe { std::env::remove_var(var) };
        let config = LlmConfig {
            api_key_env: var.into(),
            ..LlmConfig::default()
        };
        match config.resolve_api_key() {
            Err(ConfigError::EnvVarMissing { var: missing }) => assert_eq!(missing, var),
            other => panic!("Expected EnvVarMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_api_key_from_env() {
        let var = "CV_TEST_PRESENT_KEY_VAR";
        // SAFETY: test-only env var manipulation
        unsafe { std::env::set_var(var, "env-key") };
        let config = LlmConfig {
            api_key_env: var.into(),
            ..LlmConfig::default()
        };
        assert_eq!(config.resolve_api_key().unwrap(), "env-key");
        // SAFETY: test-only env var manipulation
        unsafe { std::env::remove_var(var) };
    }
}
