//! # Cartvoice Core
//!
//! Core library for the Cartvoice voice-shopping assistant backend.
//! Provides preference extraction, voice command interpretation, the
//! structured-output LLM interface (brain), configuration, and the HTTP
//! gateway that exposes them.

pub mod brain;
pub mod commands;
pub mod config;
pub mod error;
pub mod extraction;
pub mod gateway;
pub mod providers;
pub mod store;
pub mod transcript;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{MockStructuredLlm, StructuredLlm, StructuredRequest};
pub use commands::{
    CommandDecision, CommandGate, KeywordCommandInterpreter, LlmCommandInterpreter,
    VoiceCommandInterpreter, create_interpreter,
};
pub use config::{AppConfig, LlmConfig, load_config};
pub use error::{CartError, ConfigError, LlmError, Result};
pub use extraction::PreferenceExtractor;
pub use store::{ApplyOutcome, InMemorySavedProducts, SavedProducts};
pub use transcript::{HttpTranscriptSink, MemoryTranscriptSink, TranscriptLogger, TranscriptSink};
pub use types::{
    CommandAction, PreferenceCategory, PreferenceRecord, Speaker, TranscriptEntry, VoiceCommand,
};
