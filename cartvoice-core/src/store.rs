//! Saved-products mutation seam.
//!
//! Accepted voice commands end in a mutation of the shopper's saved-products
//! list. In production that list lives in an external real-time database;
//! [`SavedProducts`] is the boundary, and [`InMemorySavedProducts`] backs the
//! local server and tests.

use crate::types::{CommandAction, VoiceCommand};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// What a single command changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    /// Numbers whose saved state changed.
    pub changed: Vec<u32>,
    /// Numbers already in the requested state.
    pub unchanged: Vec<u32>,
}

/// Per-user saved-product lists.
#[async_trait]
pub trait SavedProducts: Send + Sync {
    /// Apply a save/remove command for `user_id`.
    async fn apply(&self, user_id: &str, command: &VoiceCommand) -> ApplyOutcome;

    /// Saved product numbers for `user_id`, oldest first.
    async fn list(&self, user_id: &str) -> Vec<u32>;
}

/// In-process implementation of [`SavedProducts`].
#[derive(Debug, Default)]
pub struct InMemorySavedProducts {
    lists: RwLock<HashMap<String, Vec<u32>>>,
}

impl InMemorySavedProducts {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SavedProducts for InMemorySavedProducts {
    async fn apply(&self, user_id: &str, command: &VoiceCommand) -> ApplyOutcome {
        let mut lists = self.lists.write().await;
        let saved = lists.entry(user_id.to_string()).or_default();
        let mut outcome = ApplyOutcome::default();

        for &number in &command.product_numbers {
            let position = saved.iter().position(|n| *n == number);
            match (command.action, position) {
                (CommandAction::Save, None) => {
                    saved.push(number);
                    outcome.changed.push(number);
                }
                (CommandAction::Remove, Some(index)) => {
                    saved.remove(index);
                    outcome.changed.push(number);
                }
                _ => outcome.unchanged.push(number),
            }
        }

        outcome
    }

    async fn list(&self, user_id: &str) -> Vec<u32> {
        self.lists
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}
