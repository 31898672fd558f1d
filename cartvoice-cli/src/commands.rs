//! CLI subcommand handlers.

use crate::{Commands, ConfigAction};
use cartvoice_core::config::{AppConfig, load_config};
use cartvoice_core::gateway::{AppState, run_gateway};
use cartvoice_core::providers::create_provider;
use cartvoice_core::{
    CommandDecision, CommandGate, KeywordCommandInterpreter, LlmCommandInterpreter,
    PreferenceExtractor, VoiceCommandInterpreter,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Serve { host, port } => handle_serve(host, port, workspace).await,
        Commands::Extract {
            transcript,
            history,
        } => handle_extract(&transcript, history.as_deref(), workspace).await,
        Commands::Interpret {
            transcript,
            keyword,
        } => handle_interpret(&transcript, keyword, workspace).await,
        Commands::Config { action } => handle_config(action, workspace).await,
    }
}

fn load(workspace: &Path) -> anyhow::Result<AppConfig> {
    let config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    for warning in config.validate() {
        warn!("{}", warning);
    }
    Ok(config)
}

async fn handle_serve(
    host: Option<String>,
    port: Option<u16>,
    workspace: &Path,
) -> anyhow::Result<()> {
    let mut config = load(workspace)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if config.server.session_tokens.is_empty() {
        warn!("No session tokens configured; authenticated endpoints will reject every request");
    }

    let state = Arc::new(AppState::from_config(&config));
    info!(?state, "Starting gateway");
    run_gateway(state, &config.server.host, config.server.port).await?;
    Ok(())
}

async fn handle_extract(
    transcript: &str,
    history: Option<&str>,
    workspace: &Path,
) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let llm = create_provider(&config.llm)?;
    let extractor = PreferenceExtractor::new(llm);

    let preferences = extractor.extract(transcript, history).await?;
    println!("{}", serde_json::to_string_pretty(&preferences)?);
    Ok(())
}

async fn handle_interpret(transcript: &str, keyword: bool, workspace: &Path) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let interpreter: Arc<dyn VoiceCommandInterpreter> =
        if keyword || config.commands.interpreter == "keyword" {
            Arc::new(KeywordCommandInterpreter::new())
        } else {
            Arc::new(LlmCommandInterpreter::new(create_provider(&config.llm)?))
        };

    let command = interpreter.interpret(transcript).await?;
    let gate = CommandGate::new(config.commands.confidence_threshold);
    let output = match gate.evaluate(command) {
        CommandDecision::Apply(command) => serde_json::json!({
            "accepted": true,
            "command": command,
        }),
        CommandDecision::AskToRepeat { command, prompt } => serde_json::json!({
            "accepted": false,
            "command": command,
            "prompt": prompt,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".cartvoice");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&AppConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = redacted(load(workspace)?);
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Mask credentials before printing: the API key and every session token.
/// Token keys become `***1`, `***2`, ... ordered by user id.
fn redacted(mut config: AppConfig) -> AppConfig {
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some("***".to_string());
    }
    let mut users: Vec<String> = config.server.session_tokens.drain().map(|(_, u)| u).collect();
    users.sort();
    config.server.session_tokens = users
        .into_iter()
        .enumerate()
        .map(|(i, user)| (format!("***{}", i + 1), user))
        .collect();
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();

        let config_path = workspace.join(".cartvoice").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: AppConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.llm.model, "gemini-2.0-flash");
        assert_eq!(parsed.commands.confidence_threshold, 0.70);
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let config_dir = workspace.join(".cartvoice");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[server]\nport = 4000\n").unwrap();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();

        let content = std::fs::read_to_string(config_dir.join("config.toml")).unwrap();
        assert_eq!(content, "[server]\nport = 4000\n");
    }

    #[test]
    fn test_redacted_masks_session_tokens() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("secret-key".to_string());
        config
            .server
            .session_tokens
            .insert("tok-b".to_string(), "user_b".to_string());
        config
            .server
            .session_tokens
            .insert("tok-a".to_string(), "user_a".to_string());

        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!shown.contains("secret-key"));
        assert!(!shown.contains("tok-a"));
        assert!(!shown.contains("tok-b"));

        let parsed: AppConfig = toml::from_str(&shown).unwrap();
        assert_eq!(parsed.server.session_tokens["***1"], "user_a");
        assert_eq!(parsed.server.session_tokens["***2"], "user_b");
    }

    #[tokio::test]
    async fn test_interpret_keyword_runs_offline() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Interpret {
            transcript: "save the second one".to_string(),
            keyword: true,
        };
        handle_command(command, dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn test_interpret_keyword_unrecognized_is_error() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Interpret {
            transcript: "how much is shipping".to_string(),
            keyword: true,
        };
        assert!(handle_command(command, dir.path()).await.is_err());
    }
}
