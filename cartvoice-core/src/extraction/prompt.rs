//! Prompt and response schema for preference extraction.

use crate::types::PreferenceCategory;
use serde_json::{Value, json};

/// Build the extraction prompt. Both inputs are embedded verbatim.
pub fn preference_prompt(transcript: &str, conversation_history: Option<&str>) -> String {
    let history = conversation_history
        .filter(|h| !h.is_empty())
        .unwrap_or("None");

    format!(
        r#"You are a shopping assistant that extracts product preferences from what a shopper says.

Conversation so far:
{history}

Latest transcript:
"{transcript}"

Extract every product preference expressed in the latest transcript. Use the
conversation only to resolve references such as "those" or "the cheaper one".

For each preference return:
- category: one of material, size, price, color, style, feature, other
- tag: a short label for the preference (e.g. "waterproof", "under $50", "navy blue")
- value: the concrete value when one was stated (e.g. "50", "XL"), otherwise omit
- priority: an integer from 1 to 10
- productContext: the product the preference applies to, when stated

Assign priority by how strongly it was expressed:
- 8-10: explicit emphasis ("must", "definitely", "I need", "only")
- 6-8: clear preference language ("I prefer", "I'd like", "ideally")
- 4-6: mild interest ("maybe", "could be nice", "not opposed to")
- 1-3: passing mention

If the shopper expressed no preferences, return an empty preferences array.
Respond with JSON only."#
    )
}

/// Response schema: `{ "preferences": [PreferenceRecord] }`.
pub fn preference_schema() -> Value {
    let categories: Vec<&str> = PreferenceCategory::ALL.iter().map(|c| c.as_str()).collect();
    json!({
        "type": "OBJECT",
        "properties": {
            "preferences": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "category": {"type": "STRING", "enum": categories},
                        "tag": {"type": "STRING"},
                        "value": {"type": "STRING"},
                        "priority": {"type": "INTEGER", "minimum": 1, "maximum": 10},
                        "productContext": {"type": "STRING"}
                    },
                    "required": ["category", "tag", "priority"]
                }
            }
        },
        "required": ["preferences"]
    })
}
