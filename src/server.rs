//! HTTP server for the embedded chat widget.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/agent/chat/` | Chat turn: `{"message", "session_id"?}` |
//! | `POST` | `/agent/voice/?action=tts` | Synthesize `{"text"}` into `{"audio_base64"}` |
//! | `POST` | `/agent/voice/?action=stt` | Transcribe multipart field `audio` into `{"text"}` |
//! | `GET`  | `/ws/call/{username}/` | Call signaling WebSocket |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Message too long (max 1000 characters)" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! Internal errors never carry detail to the client; it is logged instead.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the widget can be
//! embedded on any storefront.

use axum::{
    body::Bytes,
    extract::{
        rejection::BytesRejection, ws::WebSocketUpgrade, DefaultBodyLimit, FromRequest,
        Multipart, Path, Query, Request, State,
    },
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chat::{
    ChatError, ChatRequest, ChatResponse, ChatService, ChatSettings, MAX_MESSAGE_CHARS,
};
use crate::config::{Config, VoiceConfig};
use crate::db;
use crate::embedding::create_provider;
use crate::gateway::LlmGateway;
use crate::history::SqliteHistory;
use crate::migrate;
use crate::signaling::{run_socket, valid_username, SignalHub};
use crate::sqlite_index::SqliteIndex;
use crate::voice::{create_engine, SpeechEngine, UNINTELLIGIBLE};

/// Chat bodies beyond this cannot hold a valid message.
const CHAT_BODY_LIMIT: usize = 64 * 1024;

/// Headroom over the audio limit for multipart framing. Also caps TTS bodies.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    chat: Arc<ChatService>,
    speech: Arc<dyn SpeechEngine>,
    signals: Arc<SignalHub>,
    max_text_chars: usize,
    max_audio_bytes: usize,
}

impl AppState {
    pub fn new(chat: Arc<ChatService>, speech: Arc<dyn SpeechEngine>, voice: &VoiceConfig) -> Self {
        Self {
            chat,
            speech,
            signals: Arc::new(SignalHub::new()),
            max_text_chars: voice.max_text_chars,
            max_audio_bytes: voice.max_audio_bytes,
        }
    }
}

/// Wire every collaborator from config: SQLite index and history, the
/// optional embedder, the LLM gateway and the speech engine.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let embedder = create_provider(&config.embedding)?;
    let index = Arc::new(
        SqliteIndex::new(pool.clone()).with_embedder(embedder, config.embedding.batch_size),
    );
    match index.active_generation().await? {
        Some(generation) => tracing::info!(generation, "serving catalog"),
        None => tracing::warn!("no catalog published yet; run `salesbot load` first"),
    }

    let history = Arc::new(SqliteHistory::new(pool));
    let gateway = Arc::new(LlmGateway::from_config(&config.llm)?);
    let settings = ChatSettings {
        retrieval: config.retrieval.params(),
        prompt_turns: config.history.prompt_turns,
        response_turns: config.history.response_turns,
        offset: config.history.offset()?,
    };

    let mut chat = ChatService::new(index.clone(), history, gateway, settings);
    if config.history.mirror_to_index {
        chat = chat.with_memory(index);
    }

    let speech = create_engine(&config.voice)?;
    Ok(AppState::new(Arc::new(chat), speech, &config.voice))
}

/// Route table with CORS and request tracing applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.max_audio_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route(
            "/agent/chat/",
            post(handle_chat).layer(DefaultBodyLimit::max(CHAT_BODY_LIMIT)),
        )
        .route(
            "/agent/voice/",
            post(handle_voice).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/ws/call/{username}/", get(handle_call_socket))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "salesbot listening");
    println!("salesbot listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Validation(message) => bad_request(message),
            ChatError::Internal(e) => {
                tracing::error!(error = %e, "chat request failed");
                internal("Internal server error")
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /agent/chat/ ============

/// Checks are ordered: content type, encoding, JSON shape, then message
/// validation inside the orchestrator. None of them touch storage.
async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    if !is_json(&headers) {
        return Err(bad_request("Content-Type must be application/json"));
    }
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            message_too_long()
        } else {
            tracing::warn!(error = %rejection, "failed to read chat body");
            bad_request("Invalid JSON format")
        }
    })?;
    let text = std::str::from_utf8(&body).map_err(|_| bad_request("Invalid character encoding"))?;
    let request: ChatRequest =
        serde_json::from_str(text).map_err(|_| bad_request("Invalid JSON format"))?;

    let response = state.chat.clone().handle_isolated(request).await?;
    Ok(Json(response))
}

fn message_too_long() -> AppError {
    bad_request(format!(
        "Message too long (max {} characters)",
        MAX_MESSAGE_CHARS
    ))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

// ============ POST /agent/voice/ ============

#[derive(Deserialize)]
struct VoiceQuery {
    #[serde(default = "default_action")]
    action: String,
}

fn default_action() -> String {
    "tts".to_string()
}

#[derive(Deserialize)]
struct TtsRequest {
    #[serde(default)]
    text: Option<String>,
}

async fn handle_voice(
    State(state): State<AppState>,
    Query(query): Query<VoiceQuery>,
    request: Request,
) -> Result<Json<serde_json::Value>, AppError> {
    match query.action.as_str() {
        "tts" => synthesize(&state, request).await,
        "stt" => transcribe(&state, request).await,
        _ => Err(bad_request("Invalid action. Use ?action=tts or ?action=stt")),
    }
}

async fn synthesize(state: &AppState, request: Request) -> Result<Json<serde_json::Value>, AppError> {
    let body = axum::body::to_bytes(request.into_body(), MULTIPART_OVERHEAD)
        .await
        .map_err(|_| bad_request("Invalid request body"))?;
    let payload: TtsRequest =
        serde_json::from_slice(&body).map_err(|_| bad_request("Invalid JSON format"))?;

    let text = payload.text.unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(bad_request("Text field is required"));
    }
    if text.chars().count() > state.max_text_chars {
        return Err(bad_request(format!(
            "Text too long (max {} characters)",
            state.max_text_chars
        )));
    }

    let audio = state.speech.synthesize(text).await.map_err(|e| {
        tracing::error!(error = %e, "text-to-speech failed");
        internal("Text-to-speech failed")
    })?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(audio);
    Ok(Json(serde_json::json!({ "audio_base64": encoded })))
}

async fn transcribe(state: &AppState, request: Request) -> Result<Json<serde_json::Value>, AppError> {
    let missing = || bad_request("No audio file provided");
    let too_large = || {
        bad_request(format!(
            "Audio file too large (max {}MB)",
            state.max_audio_bytes / (1024 * 1024)
        ))
    };

    let mut form = Multipart::from_request(request, state)
        .await
        .map_err(|_| missing())?;

    let mut upload = None;
    while let Some(field) = form.next_field().await.map_err(|_| too_large())? {
        if field.name() != Some("audio") {
            continue;
        }
        let filename = field.file_name().unwrap_or("audio.wav").to_string();
        let bytes = field.bytes().await.map_err(|_| too_large())?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) = upload.ok_or_else(missing)?;
    if bytes.len() > state.max_audio_bytes {
        return Err(too_large());
    }

    let text = state
        .speech
        .transcribe(bytes.to_vec(), &filename)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "speech-to-text failed");
            internal("Speech-to-text failed")
        })?;
    let text = if text.is_empty() {
        UNINTELLIGIBLE.to_string()
    } else {
        text
    };
    Ok(Json(serde_json::json!({ "text": text })))
}

// ============ GET /ws/call/{username}/ ============

async fn handle_call_socket(
    State(state): State<AppState>,
    Path(username): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if !valid_username(&username) {
        return not_found("unknown signaling route").into_response();
    }
    let hub = state.signals.clone();
    ws.on_upgrade(move |socket| run_socket(socket, hub, username))
}
