//! Parsing and validation of structured model responses.
//!
//! The model is asked for bare JSON, but responses occasionally arrive in a
//! markdown fence. Shape checks happen here so nothing malformed reaches a
//! caller: a single bad record fails the whole response.

use crate::error::CartError;
use crate::types::PreferenceRecord;
use serde::Deserialize;
use serde_json::Value;

/// Extract the JSON body from a potentially markdown-fenced response.
pub(crate) fn extract_json_block(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }

    trimmed
}

/// Parse raw model text into a JSON value.
pub(crate) fn parse_json(raw: &str) -> Result<Value, CartError> {
    serde_json::from_str(extract_json_block(raw))
        .map_err(|e| CartError::extraction(format!("model response is not valid JSON: {}", e)))
}

/// Validate an extraction response and return its preference records.
///
/// Fails when `preferences` is missing or not an array, or when any record
/// violates the schema.
pub fn parse_preferences(raw: &str) -> Result<Vec<PreferenceRecord>, CartError> {
    Ok(validated_preferences(raw)?
        .into_iter()
        .map(|(record, _)| record)
        .collect())
}

/// Validate an extraction response and return the records exactly as the
/// model produced them, including `null` optionals and any extra keys.
pub fn parse_preference_values(raw: &str) -> Result<Vec<Value>, CartError> {
    Ok(validated_preferences(raw)?
        .into_iter()
        .map(|(_, value)| value)
        .collect())
}

fn validated_preferences(raw: &str) -> Result<Vec<(PreferenceRecord, Value)>, CartError> {
    let value = parse_json(raw)?;

    let items = match value {
        Value::Object(mut map) => match map.remove("preferences") {
            Some(Value::Array(items)) => items,
            _ => return Err(CartError::extraction("Invalid response format from AI")),
        },
        _ => return Err(CartError::extraction("Invalid response format from AI")),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let record = PreferenceRecord::deserialize(&item).map_err(|e| {
                CartError::extraction(format!("preference {} is malformed: {}", index, e))
            })?;
            record.validate().map_err(|reason| {
                CartError::extraction(format!("preference {} is invalid: {}", index, reason))
            })?;
            Ok((record, item))
        })
        .collect()
}
