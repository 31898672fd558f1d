//! Core type definitions for Cartvoice.
//!
//! Defines the records produced from a transcript: shopping preferences,
//! save/remove voice commands, and conversation transcript entries.

use serde::{Deserialize, Serialize};

/// Lowest priority a preference may carry.
pub const MIN_PRIORITY: i64 = 1;
/// Highest priority a preference may carry.
pub const MAX_PRIORITY: i64 = 10;

/// The kind of attribute a shopping preference describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferenceCategory {
    Material,
    Size,
    Price,
    Color,
    Style,
    Feature,
    Other,
}

impl PreferenceCategory {
    /// Every category, in the order the response schema lists them.
    pub const ALL: [PreferenceCategory; 7] = [
        PreferenceCategory::Material,
        PreferenceCategory::Size,
        PreferenceCategory::Price,
        PreferenceCategory::Color,
        PreferenceCategory::Style,
        PreferenceCategory::Feature,
        PreferenceCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceCategory::Material => "material",
            PreferenceCategory::Size => "size",
            PreferenceCategory::Price => "price",
            PreferenceCategory::Color => "color",
            PreferenceCategory::Style => "style",
            PreferenceCategory::Feature => "feature",
            PreferenceCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for PreferenceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One shopping preference extracted from a transcript.
///
/// Optional fields are omitted on output so a record serializes back to the
/// same JSON the model produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    pub category: PreferenceCategory,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_context: Option<String>,
}

impl PreferenceRecord {
    pub fn new(category: PreferenceCategory, tag: impl Into<String>, priority: i64) -> Self {
        Self {
            category,
            tag: tag.into(),
            value: None,
            priority,
            product_context: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_product_context(mut self, context: impl Into<String>) -> Self {
        self.product_context = Some(context.into());
        self
    }

    /// Check the invariants the response schema cannot express on its own.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.tag.trim().is_empty() {
            return Err("tag must not be empty".to_string());
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(format!(
                "priority {} is outside {}..={}",
                self.priority, MIN_PRIORITY, MAX_PRIORITY
            ));
        }
        Ok(())
    }
}

/// What a voice command does to the listed products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    Save,
    Remove,
}

impl std::fmt::Display for CommandAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandAction::Save => write!(f, "save"),
            CommandAction::Remove => write!(f, "remove"),
        }
    }
}

/// A save/remove command over numbered products, as interpreted from one utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceCommand {
    pub action: CommandAction,
    /// 1-based product numbers in spoken order.
    pub product_numbers: Vec<u32>,
    /// Interpreter confidence in [0, 1].
    pub confidence: f64,
}

impl VoiceCommand {
    pub fn new(action: CommandAction, product_numbers: Vec<u32>, confidence: f64) -> Self {
        Self {
            action,
            product_numbers,
            confidence,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} is outside [0, 1]", self.confidence));
        }
        if self.product_numbers.contains(&0) {
            return Err("product numbers start at 1".to_string());
        }
        Ok(())
    }
}

/// Who spoke a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
}

/// A single conversation turn as sent to the transcript store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub session_id: String,
    pub speaker: Speaker,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_preference_record_serializes_without_absent_fields() {
        let record = PreferenceRecord::new(PreferenceCategory::Price, "under $50", 8);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"category": "price", "tag": "under $50", "priority": 8})
        );
    }

    #[test]
    fn test_preference_record_camel_case_context() {
        let record = PreferenceRecord::new(PreferenceCategory::Material, "leather", 7)
            .with_value("full-grain")
            .with_product_context("boots");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["productContext"], "boots");
        assert_eq!(json["value"], "full-grain");
    }

    #[test]
    fn test_preference_category_rejects_unknown() {
        let result: Result<PreferenceCategory, _> = serde_json::from_str("\"flavor\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_preference_validate_priority_bounds() {
        assert!(PreferenceRecord::new(PreferenceCategory::Size, "large", 1).validate().is_ok());
        assert!(PreferenceRecord::new(PreferenceCategory::Size, "large", 10).validate().is_ok());
        let err = PreferenceRecord::new(PreferenceCategory::Size, "large", 11)
            .validate()
            .unwrap_err();
        assert!(err.contains("priority 11"));
        assert!(PreferenceRecord::new(PreferenceCategory::Size, "large", 0).validate().is_err());
    }

    #[test]
    fn test_preference_validate_blank_tag() {
        let err = PreferenceRecord::new(PreferenceCategory::Color, "  ", 5)
            .validate()
            .unwrap_err();
        assert!(err.contains("tag"));
    }

    #[test]
    fn test_voice_command_wire_format() {
        let cmd = VoiceCommand::new(CommandAction::Save, vec![1, 2, 3], 0.9);
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "save", "productNumbers": [1, 2, 3], "confidence": 0.9})
        );
    }

    #[test]
    fn test_voice_command_validate() {
        assert!(VoiceCommand::new(CommandAction::Remove, vec![2], 0.7).validate().is_ok());
        assert!(VoiceCommand::new(CommandAction::Remove, vec![2], 1.2).validate().is_err());
        assert!(VoiceCommand::new(CommandAction::Remove, vec![0], 0.8).validate().is_err());
        assert!(VoiceCommand::new(CommandAction::Save, vec![1], f64::NAN).validate().is_err());
    }

    #[test]
    fn test_transcript_entry_wire_format() {
        let entry = TranscriptEntry {
            session_id: "s1".into(),
            speaker: Speaker::Agent,
            text: "Here are some boots".into(),
            timestamp: 1_700_000_000_000,
            confidence: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["speaker"], "agent");
        assert!(json["confidence"].is_null());
    }
}
