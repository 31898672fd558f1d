//! HTTP gateway server built on axum.

use super::auth::SessionAuth;
use crate::brain::StructuredLlm;
use crate::commands::{CommandDecision, CommandGate, VoiceCommandInterpreter, create_interpreter};
use crate::config::AppConfig;
use crate::error::{CartError, ConfigError};
use crate::extraction::PreferenceExtractor;
use crate::providers::create_provider;
use crate::store::{InMemorySavedProducts, SavedProducts};
use crate::transcript::{HttpTranscriptSink, TranscriptLogger, TranscriptSink};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Thread-safe shared state for axum handlers.
pub type SharedState = Arc<AppState>;

/// Default request body cap when none is configured.
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Voice sessions that keep a live transcript dedupe set at once.
const MAX_TRANSCRIPT_SESSIONS: usize = 1024;

/// Everything the request handlers need.
///
/// A missing LLM credential does not prevent construction; it is stored and
/// surfaced as a configuration error by the first request that needs it.
pub struct AppState {
    auth: SessionAuth,
    extractor: Result<PreferenceExtractor, ConfigError>,
    interpreter: Result<Arc<dyn VoiceCommandInterpreter>, ConfigError>,
    gate: CommandGate,
    store: Arc<dyn SavedProducts>,
    transcripts: Option<TranscriptSessions>,
    max_body_bytes: usize,
    started_at: chrono::DateTime<Utc>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &self.auth.token_count())
            .field("llm_configured", &self.llm_configured())
            .field("threshold", &self.gate.threshold())
            .field("transcripts", &self.transcripts.is_some())
            .finish()
    }
}

impl AppState {
    /// Create state with the given auth, model handle and interpreter kind.
    pub fn new(
        auth: SessionAuth,
        llm: Result<Arc<dyn StructuredLlm>, ConfigError>,
        interpreter_kind: &str,
        gate: CommandGate,
    ) -> Self {
        let interpreter = match (&llm, interpreter_kind) {
            // Keep the credential error so the response names the missing variable.
            (Err(e), "llm") => Err(e.clone()),
            _ => create_interpreter(interpreter_kind, llm.as_ref().ok().cloned())
                .map_err(into_config_error),
        };
        let extractor = llm.map(PreferenceExtractor::new);

        Self {
            auth,
            extractor,
            interpreter,
            gate,
            store: Arc::new(InMemorySavedProducts::new()),
            transcripts: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            started_at: Utc::now(),
        }
    }

    /// Build state from loaded configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let llm = create_provider(&config.llm).map_err(into_config_error);
        if let Err(e) = &llm {
            warn!(error = %e, "LLM provider unavailable; model-backed endpoints will fail");
        }

        let mut state = Self::new(
            SessionAuth::from_config(&config.server),
            llm,
            &config.commands.interpreter,
            CommandGate::new(config.commands.confidence_threshold),
        );
        state.max_body_bytes = config.server.max_body_bytes;

        if let Some(transcript) = config.transcript.as_ref().filter(|t| t.enabled) {
            match HttpTranscriptSink::from_config(transcript) {
                Ok(sink) => {
                    info!(endpoint = sink.endpoint(), "Transcript logging enabled");
                    state = state.with_transcript_sink(Arc::new(sink));
                }
                Err(e) => warn!(error = %e, "Transcript logging disabled"),
            }
        }
        state
    }

    /// Replace the saved-products store.
    pub fn with_store(mut self, store: Arc<dyn SavedProducts>) -> Self {
        self.store = store;
        self
    }

    /// Log voice-command turns to `sink`, one logger per user and session id.
    pub fn with_transcript_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.transcripts = Some(TranscriptSessions::new(sink, MAX_TRANSCRIPT_SESSIONS));
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn auth(&self) -> &SessionAuth {
        &self.auth
    }

    pub fn llm_configured(&self) -> bool {
        self.extractor.is_ok()
    }

    /// Uptime in seconds since the state was created.
    pub fn uptime_secs(&self) -> u64 {
        let elapsed = Utc::now() - self.started_at;
        elapsed.num_seconds().max(0) as u64
    }

    async fn transcript_logger(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Option<Arc<TranscriptLogger>> {
        let sessions = self.transcripts.as_ref()?;
        Some(sessions.logger(user_id, session_id).await)
    }
}

/// Per-(user, session) transcript loggers, bounded by least-recent use.
struct TranscriptSessions {
    sink: Arc<dyn TranscriptSink>,
    capacity: usize,
    loggers: Mutex<LoggerCache>,
}

#[derive(Default)]
struct LoggerCache {
    entries: HashMap<(String, String), CachedLogger>,
    clock: u64,
}

struct CachedLogger {
    logger: Arc<TranscriptLogger>,
    last_used: u64,
}

impl TranscriptSessions {
    fn new(sink: Arc<dyn TranscriptSink>, capacity: usize) -> Self {
        Self {
            sink,
            capacity: capacity.max(1),
            loggers: Mutex::new(LoggerCache::default()),
        }
    }

    async fn logger(&self, user_id: &str, session_id: &str) -> Arc<TranscriptLogger> {
        let mut cache = self.loggers.lock().await;
        cache.clock += 1;
        let now = cache.clock;
        let key = (user_id.to_string(), session_id.to_string());

        if !cache.entries.contains_key(&key) && cache.entries.len() >= self.capacity {
            let oldest = cache
                .entries
                .iter()
                .min_by_key(|(_, cached)| cached.last_used)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                debug!(user_id = %oldest.0, session_id = %oldest.1, "Evicting transcript session");
                cache.entries.remove(&oldest);
            }
        }

        let cached = cache.entries.entry(key).or_insert_with(|| CachedLogger {
            logger: Arc::new(TranscriptLogger::new(session_id, self.sink.clone())),
            last_used: now,
        });
        cached.last_used = now;
        cached.logger.clone()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.loggers.lock().await.entries.len()
    }
}

fn into_config_error(err: CartError) -> ConfigError {
    match err {
        CartError::Config(e) => e,
        other => ConfigError::Invalid {
            message: other.to_string(),
        },
    }
}

// --- Error responses ---

/// A [`CartError`] rendered as `{success: false, error}`.
#[derive(Debug)]
pub struct ApiError(pub CartError);

impl From<CartError> for ApiError {
    fn from(err: CartError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            CartError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            CartError::Validation { .. } => StatusCode::BAD_REQUEST,
            CartError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short message safe to return to clients.
    fn public_message(&self) -> String {
        match &self.0 {
            CartError::Authentication { message }
            | CartError::Validation { message }
            | CartError::Extraction { message } => message.clone(),
            CartError::PayloadTooLarge { .. } => "Request body too large".to_string(),
            CartError::Config(e) => format!("Server configuration error: {}", e),
            CartError::Llm(_) => "AI service request failed".to_string(),
            CartError::Io(_) | CartError::Serialization(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            warn!(kind = self.0.kind(), error = %self.0, "Request rejected");
        }
        let body = json!({ "success": false, "error": self.public_message() });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

// --- Request parsing ---

/// Buffer a request body, failing once it grows past `limit` bytes.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, CartError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|_| CartError::validation("Failed to read request body"))?;
        if buf.len() + chunk.len() > limit {
            return Err(CartError::PayloadTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

fn parse_body(body: &Bytes) -> Result<Value, CartError> {
    serde_json::from_slice(body).map_err(|_| CartError::validation("Request body must be JSON"))
}

fn required_transcript(body: &Value) -> Result<&str, CartError> {
    match body.get("transcript").and_then(Value::as_str) {
        Some(t) if !t.is_empty() => Ok(t),
        _ => Err(CartError::validation("Transcript is required")),
    }
}

fn optional_string<'a>(body: &'a Value, field: &str) -> Result<Option<&'a str>, CartError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(CartError::validation(format!("{} must be a string", field))),
    }
}

// --- Router ---

/// Build the axum router with every API route.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/extract-preferences", post(extract_preferences_handler))
        .route("/api/voice-command", post(voice_command_handler))
        .route("/api/saved-products", get(saved_products_handler))
        .route("/api/webhooks/alerts", post(alert_webhook_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "llmConfigured": state.llm_configured(),
        "uptimeSecs": state.uptime_secs(),
    }))
}

/// Extract shopping preferences from a transcript.
async fn extract_preferences_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult {
    let user_id = state.auth.authenticate(&headers)?;
    let body = parse_body(&read_body(body, state.max_body_bytes).await?)?;
    let transcript = required_transcript(&body)?;
    let history = optional_string(&body, "conversationHistory")?;

    let extractor = state.extractor.as_ref().map_err(|e| CartError::Config(e.clone()))?;
    debug!(%user_id, "Handling preference extraction");
    let preferences = extractor.extract_verbatim(transcript, history).await?;

    Ok(Json(json!({ "success": true, "preferences": preferences })))
}

/// Interpret a save/remove command and apply it when confident.
async fn voice_command_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult {
    let user_id = state.auth.authenticate(&headers)?;
    let body = parse_body(&read_body(body, state.max_body_bytes).await?)?;
    let transcript = required_transcript(&body)?;
    let session_id = optional_string(&body, "sessionId")?;

    let interpreter = state
        .interpreter
        .as_ref()
        .map_err(|e| CartError::Config(e.clone()))?;

    let logger = match session_id {
        Some(id) => state.transcript_logger(&user_id, id).await,
        None => None,
    };

    let command = match interpreter.interpret(transcript).await {
        Ok(command) => Some(command),
        // Unrecognized utterances are a conversational outcome, not a failure.
        Err(CartError::Extraction { message }) => {
            debug!(interpreter = interpreter.name(), %message, "No command recognized");
            None
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(logger) = &logger {
        logger
            .log_turn("user", transcript, command.as_ref().map(|c| c.confidence))
            .await;
    }

    let decision = match command {
        Some(command) => state.gate.evaluate(command),
        None => {
            let prompt = "Sorry, I didn't catch a save or remove command. Could you repeat that?";
            if let Some(logger) = &logger {
                logger.log_turn("assistant", prompt, None).await;
            }
            return Ok(Json(json!({
                "success": true,
                "accepted": false,
                "command": Value::Null,
                "prompt": prompt,
            })));
        }
    };

    let response = match decision {
        CommandDecision::Apply(command) => {
            let outcome = state.store.apply(&user_id, &command).await;
            let saved = state.store.list(&user_id).await;
            let message = format!(
                "{} product{} {}",
                command.action,
                if command.product_numbers.len() == 1 { "" } else { "s" },
                join_numbers(&command.product_numbers)
            );
            info!(
                %user_id,
                action = %command.action,
                changed = outcome.changed.len(),
                "Applied voice command"
            );
            if let Some(logger) = &logger {
                logger.log_turn("assistant", &message, None).await;
            }
            json!({
                "success": true,
                "accepted": true,
                "command": command,
                "message": message,
                "outcome": outcome,
                "savedProducts": saved,
            })
        }
        CommandDecision::AskToRepeat { command, prompt } => {
            if let Some(logger) = &logger {
                logger.log_turn("assistant", &prompt, None).await;
            }
            json!({
                "success": true,
                "accepted": false,
                "command": command,
                "prompt": prompt,
            })
        }
    };

    Ok(Json(response))
}

fn join_numbers(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Saved product numbers for the authenticated user.
async fn saved_products_handler(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    let user_id = state.auth.authenticate(&headers)?;
    let saved = state.store.list(&user_id).await;
    Ok(Json(json!({ "success": true, "productNumbers": saved })))
}

/// Price-alert webhook receiver. Acknowledges every delivery.
///
/// Only the first `max_body_bytes` are kept for logging; the rest of an
/// oversized body is drained and dropped.
async fn alert_webhook_handler(State(state): State<SharedState>, body: Body) -> impl IntoResponse {
    let limit = state.max_body_bytes;
    let mut stream = body.into_data_stream();
    let mut kept = Vec::new();
    let mut total = 0usize;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                total += chunk.len();
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            Err(e) => {
                warn!(error = %e, "Failed to read alert webhook body");
                break;
            }
        }
    }

    if total == 0 {
        debug!("Received empty alert webhook");
    } else if total > limit {
        warn!(bytes = total, limit, "Alert webhook body truncated");
    } else {
        match serde_json::from_slice::<Value>(&kept) {
            Ok(payload) => info!(%payload, "Received alert webhook"),
            Err(e) => warn!(error = %e, bytes = total, "Alert webhook body is not JSON"),
        }
    }
    Json(json!({ "received": true }))
}

/// Start the HTTP server and run until Ctrl-C.
pub async fn run(state: SharedState, host: &str, port: u16) -> Result<(), std::io::Error> {
    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Cartvoice gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
