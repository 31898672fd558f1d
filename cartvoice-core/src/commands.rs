//! Voice command interpretation.
//!
//! Maps an utterance like "save 1, 2, and 3" to a [`VoiceCommand`] and decides
//! whether it is safe to apply. Interpreters are pluggable: the LLM-backed one
//! asks the hosted model, the keyword one runs offline with fixed vocabulary.
//! Either way, [`CommandGate`] keeps commands below the confidence threshold
//! from ever being applied.

use crate::brain::{StructuredLlm, StructuredRequest};
use crate::config::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::error::{CartError, Result};
use crate::extraction::parse_json;
use crate::types::{CommandAction, VoiceCommand};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// Turns a transcript into a save/remove command.
#[async_trait]
pub trait VoiceCommandInterpreter: Send + Sync {
    async fn interpret(&self, transcript: &str) -> Result<VoiceCommand>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

// --- LLM-backed interpreter ---

/// Interprets commands with a structured-output model call.
pub struct LlmCommandInterpreter {
    llm: Arc<dyn StructuredLlm>,
}

impl LlmCommandInterpreter {
    pub fn new(llm: Arc<dyn StructuredLlm>) -> Self {
        Self { llm }
    }

    fn prompt(transcript: &str) -> String {
        format!(
            r#"A shopper is looking at a numbered list of products and speaking commands.

Transcript:
"{transcript}"

Decide whether the shopper wants to save products or remove saved products.
- action: "save" or "remove"
- productNumbers: every product number mentioned, in the order spoken
  ("save 1, 2, and 3" means [1, 2, 3]; "the second one" means [2])
- confidence: how sure you are, from 0.0 to 1.0. Use a low value when the
  transcript is unclear, mentions no products, or mixes saving and removing.

Respond with JSON only."#
        )
    }

    fn schema() -> Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "action": {"type": "STRING", "enum": ["save", "remove"]},
                "productNumbers": {"type": "ARRAY", "items": {"type": "INTEGER"}},
                "confidence": {"type": "NUMBER"}
            },
            "required": ["action", "productNumbers", "confidence"]
        })
    }
}

#[async_trait]
impl VoiceCommandInterpreter for LlmCommandInterpreter {
    async fn interpret(&self, transcript: &str) -> Result<VoiceCommand> {
        let mut request = StructuredRequest::new(Self::prompt(transcript), Self::schema());
        request.temperature = Some(0.0);

        let raw = self.llm.generate_json(request).await?;
        let command: VoiceCommand = serde_json::from_value(parse_json(&raw)?)
            .map_err(|e| CartError::extraction(format!("command response is malformed: {}", e)))?;
        command
            .validate()
            .map_err(|reason| CartError::extraction(format!("command is invalid: {}", reason)))?;
        Ok(command)
    }

    fn name(&self) -> &str {
        "llm"
    }
}

// --- Keyword interpreter ---

const SAVE_VERBS: &[&str] = &[
    "save",
    "add",
    "keep",
    "bookmark",
    "like",
    "favorite",
    "favourite",
];
const REMOVE_VERBS: &[&str] = &["remove", "delete", "unsave", "drop", "discard"];

const NUMBER_WORDS: &[&str] = &[
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
    "twenty",
];
const ORDINAL_WORDS: &[&str] = &[
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
];

/// Words after which "one" refers to a product instead of numbering it.
const DETERMINERS: &[&str] = &[
    "the", "this", "that", "these", "those", "which", "last", "other", "another", "each", "every",
];

/// Confidence when exactly one verb family and at least one number were heard.
const CLEAR_CONFIDENCE: f64 = 0.95;
/// Confidence when both save and remove verbs were heard.
const MIXED_CONFIDENCE: f64 = 0.4;
/// Confidence when a verb was heard but no product number.
const NO_NUMBER_CONFIDENCE: f64 = 0.3;

/// Offline interpreter with a fixed vocabulary.
#[derive(Debug, Clone, Default)]
pub struct KeywordCommandInterpreter;

impl KeywordCommandInterpreter {
    pub fn new() -> Self {
        Self
    }

    /// Parse one product number token: digits, number words, ordinals, or `2nd`-style.
    fn parse_number(token: &str) -> Option<u32> {
        if let Ok(n) = token.parse::<u32>() {
            return Some(n);
        }
        if let Some(pos) = NUMBER_WORDS.iter().position(|w| *w == token) {
            return Some(pos as u32 + 1);
        }
        if let Some(pos) = ORDINAL_WORDS.iter().position(|w| *w == token) {
            return Some(pos as u32 + 1);
        }
        ["st", "nd", "rd", "th"]
            .iter()
            .find_map(|suffix| token.strip_suffix(suffix))
            .and_then(|digits| digits.parse::<u32>().ok())
    }

    fn is_ordinal(token: &str) -> bool {
        ORDINAL_WORDS.contains(&token)
            || ["st", "nd", "rd", "th"]
                .iter()
                .filter_map(|suffix| token.strip_suffix(suffix))
                .any(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
    }

    /// Interpret synchronously; the async trait method delegates here.
    pub fn parse(&self, transcript: &str) -> Result<VoiceCommand> {
        let normalized: String = transcript
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();

        let mut first_action = None;
        let mut saw_save = false;
        let mut saw_remove = false;
        let mut numbers: Vec<u32> = Vec::new();
        let mut after_referent = false;

        for token in normalized.split_whitespace() {
            // "the second one", "that one": "one" is a pronoun here, not product 1.
            let skip = after_referent && matches!(token, "one" | "ones");
            after_referent = DETERMINERS.contains(&token) || Self::is_ordinal(token);
            if skip {
                continue;
            }
            if SAVE_VERBS.contains(&token) {
                saw_save = true;
                first_action.get_or_insert(CommandAction::Save);
            } else if REMOVE_VERBS.contains(&token) {
                saw_remove = true;
                first_action.get_or_insert(CommandAction::Remove);
            } else if let Some(n) = Self::parse_number(token)
                && n > 0
                && !numbers.contains(&n)
            {
                numbers.push(n);
            }
        }

        let action = first_action
            .ok_or_else(|| CartError::extraction("No save or remove command recognized"))?;

        let confidence = if saw_save && saw_remove {
            MIXED_CONFIDENCE
        } else if numbers.is_empty() {
            NO_NUMBER_CONFIDENCE
        } else {
            CLEAR_CONFIDENCE
        };

        Ok(VoiceCommand::new(action, numbers, confidence))
    }
}

#[async_trait]
impl VoiceCommandInterpreter for KeywordCommandInterpreter {
    async fn interpret(&self, transcript: &str) -> Result<VoiceCommand> {
        self.parse(transcript)
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

// --- Acceptance gate ---

/// Outcome of gating an interpreted command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandDecision {
    /// Confident enough to apply.
    Apply(VoiceCommand),
    /// Ask the shopper to repeat; the command must not be applied.
    AskToRepeat {
        command: VoiceCommand,
        prompt: String,
    },
}

impl CommandDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandDecision::Apply(_))
    }

    pub fn command(&self) -> &VoiceCommand {
        match self {
            CommandDecision::Apply(command) => command,
            CommandDecision::AskToRepeat { command, .. } => command,
        }
    }
}

/// Applies the fixed acceptance threshold to interpreted commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandGate {
    threshold: f64,
}

impl Default for CommandGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl CommandGate {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Accept at or above the threshold with at least one product number.
    pub fn evaluate(&self, command: VoiceCommand) -> CommandDecision {
        if command.confidence < self.threshold {
            debug!(
                confidence = command.confidence,
                threshold = self.threshold,
                "Command below confidence threshold"
            );
            return CommandDecision::AskToRepeat {
                command,
                prompt: "Sorry, I didn't quite catch that. Could you repeat which products \
                         you'd like to save or remove?"
                    .to_string(),
            };
        }
        if command.product_numbers.is_empty() {
            let prompt = format!(
                "Which product numbers would you like to {}?",
                command.action
            );
            return CommandDecision::AskToRepeat { command, prompt };
        }
        CommandDecision::Apply(command)
    }
}

/// Build the interpreter named in config.
///
/// `llm` is required for the "llm" interpreter; without it a configuration
/// error is returned.
pub fn create_interpreter(
    kind: &str,
    llm: Option<Arc<dyn StructuredLlm>>,
) -> Result<Arc<dyn VoiceCommandInterpreter>> {
    match (kind, llm) {
        ("keyword", _) => Ok(Arc::new(KeywordCommandInterpreter::new())),
        ("llm", Some(llm)) => Ok(Arc::new(LlmCommandInterpreter::new(llm))),
        ("llm", None) => Err(CartError::Config(crate::error::ConfigError::Invalid {
            message: "the llm interpreter needs a configured LLM credential".to_string(),
        })),
        (other, _) => Err(CartError::Config(crate::error::ConfigError::Invalid {
            message: format!("unknown interpreter '{}'", other),
        })),
    }
}
