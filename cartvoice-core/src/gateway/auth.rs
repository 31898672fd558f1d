//! Gateway authentication.

use crate::config::ServerConfig;
use crate::error::CartError;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use std::collections::HashMap;

/// Bearer-token session authentication.
///
/// Each configured token maps to the user id it authenticates. Unlike an
/// open-mode gateway, an empty token set authenticates nobody.
#[derive(Debug, Clone, Default)]
pub struct SessionAuth {
    sessions: HashMap<String, String>,
}

impl SessionAuth {
    /// Create a new auth validator from the server config.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.session_tokens.clone())
    }

    /// Create a new auth validator with the given token → user id map.
    pub fn new(sessions: HashMap<String, String>) -> Self {
        Self { sessions }
    }

    /// Look up the user a token belongs to.
    pub fn validate(&self, token: &str) -> Option<&str> {
        if token.is_empty() {
            return None;
        }
        self.sessions.get(token).map(String::as_str)
    }

    /// Authenticate a request from its `Authorization: Bearer <token>` header.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, CartError> {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CartError::authentication("Unauthorized"))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .ok_or_else(|| CartError::authentication("Unauthorized"))?;

        self.validate(token)
            .map(str::to_string)
            .ok_or_else(|| CartError::authentication("Unauthorized"))
    }

    /// Number of configured session tokens.
    pub fn token_count(&self) -> usize {
        self.sessions.len()
    }
}
