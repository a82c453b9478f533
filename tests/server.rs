//! HTTP contract tests, driven in-process through the axum router.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::FixedOffset;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use salesbot::chat::{ChatService, ChatSettings};
use salesbot::config::VoiceConfig;
use salesbot::gateway::{ChatCompletion, GatewayError};
use salesbot::server::{router, AppState};
use salesbot::voice::{SpeechEngine, SpeechError, UNINTELLIGIBLE};
use salesbot_core::history::InMemoryHistory;
use salesbot_core::index::memory::InMemoryIndex;
use salesbot_core::models::Product;
use salesbot_core::prompt::ChatMessage;
use salesbot_core::retrieval::RetrievalParams;

// ─── Test doubles ───────────────────────────────────────────────────

struct Canned;

#[async_trait]
impl ChatCompletion for Canned {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, GatewayError> {
        Ok("We have the Aero 14 in stock.".to_string())
    }
}

struct FakeSpeech {
    transcript: String,
    fail: bool,
}

#[async_trait]
impl SpeechEngine for FakeSpeech {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, SpeechError> {
        if self.fail {
            return Err(SpeechError::Disabled);
        }
        Ok(vec![1, 2, 3])
    }

    async fn transcribe(&self, audio: Vec<u8>, _filename: &str) -> Result<String, SpeechError> {
        if self.fail {
            return Err(SpeechError::Disabled);
        }
        assert!(!audio.is_empty());
        Ok(self.transcript.clone())
    }
}

fn app_with(speech: FakeSpeech) -> Router {
    let index = Arc::new(InMemoryIndex::with_products(&[Product {
        name: "Aero 14".to_string(),
        category: "Laptops".to_string(),
        model: "AERO-14".to_string(),
        price: 800.0,
        billing_ref: None,
        attributes: Default::default(),
    }]));
    let settings = ChatSettings {
        retrieval: RetrievalParams::default(),
        prompt_turns: 10,
        response_turns: 50,
        offset: FixedOffset::east_opt(5 * 3600).unwrap(),
    };
    let chat = ChatService::new(
        index,
        Arc::new(InMemoryHistory::new()),
        Arc::new(Canned),
        settings,
    );
    let voice = VoiceConfig {
        max_audio_bytes: 64,
        ..VoiceConfig::default()
    };
    router(AppState::new(Arc::new(chat), Arc::new(speech), &voice))
}

fn app() -> Router {
    app_with(FakeSpeech {
        transcript: "show me laptops".to_string(),
        fail: false,
    })
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", content_type)
        .body(body.into())
        .unwrap()
}

fn assert_bad_request(status: StatusCode, body: &Value, message: &str) {
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], message);
}

fn multipart(field: &str, data: &[u8]) -> (String, Vec<u8>) {
    let boundary = "salesbot-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"clip.wav\"\r\nContent-Type: audio/wav\r\n\r\n",
            b = boundary,
            f = field
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (format!("multipart/form-data; boundary={}", boundary), body)
}

// ─── GET /health ────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(app(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

// ─── POST /agent/chat/ ──────────────────────────────────────────────

#[tokio::test]
async fn test_chat_success_shape() {
    let req = post(
        "/agent/chat/",
        "application/json",
        r#"{"message": "any laptops?", "session_id": "web-1"}"#,
    );
    let (status, body) = send(app(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "We have the Aero 14 in stock.");
    assert_eq!(body["lead_stage"], "hot");
    assert_eq!(body["emotion"], "helpful");
    assert_eq!(body["history"].as_array().unwrap().len(), 2);
    assert_eq!(body["history"][0]["sender"], "user");
    assert_eq!(body["history"][1]["sender"], "agent");
    assert_eq!(body["debug_info"]["products_found"], 1);
    assert_eq!(body["debug_info"]["search_successful"], true);
    assert_eq!(body["debug_info"]["api_used"], true);
    assert!(body["debug_info"]["api_error"].is_null());
}

#[tokio::test]
async fn test_chat_rejects_bad_input() {
    let (status, body) = send(app(), post("/agent/chat/", "text/plain", "hi")).await;
    assert_bad_request(status, &body, "Content-Type must be application/json");

    let (status, body) = send(app(), post("/agent/chat/", "application/json", "{oops")).await;
    assert_bad_request(status, &body, "Invalid JSON format");

    let invalid_utf8 = vec![b'{', 0xff, 0xfe, b'}'];
    let (status, body) = send(app(), post("/agent/chat/", "application/json", invalid_utf8)).await;
    assert_bad_request(status, &body, "Invalid character encoding");

    let (status, body) =
        send(app(), post("/agent/chat/", "application/json", r#"{"message": "  "}"#)).await;
    assert_bad_request(status, &body, "Message field is required and cannot be empty");

    let long = serde_json::json!({ "message": "a".repeat(1001) }).to_string();
    let (status, body) = send(app(), post("/agent/chat/", "application/json", long)).await;
    assert_bad_request(status, &body, "Message too long (max 1000 characters)");

    // Bodies too large to buffer get the same JSON error, not a bare 413.
    for size in [100 * 1024, 3 * 1024 * 1024] {
        let huge = serde_json::json!({ "message": "a".repeat(size) }).to_string();
        let (status, body) = send(app(), post("/agent/chat/", "application/json", huge)).await;
        assert_bad_request(status, &body, "Message too long (max 1000 characters)");
    }
}

#[tokio::test]
async fn test_chat_accepts_charset_parameter() {
    let req = post(
        "/agent/chat/",
        "application/json; charset=utf-8",
        r#"{"message": "hello"}"#,
    );
    let (status, _) = send(app(), req).await;
    assert_eq!(status, StatusCode::OK);
}

// ─── POST /agent/voice/ ─────────────────────────────────────────────

#[tokio::test]
async fn test_voice_tts() {
    let req = post("/agent/voice/?action=tts", "application/json", r#"{"text": "Hello"}"#);
    let (status, body) = send(app(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["audio_base64"], "AQID");

    // tts is the default action
    let req = post("/agent/voice/", "application/json", r#"{"text": "Hello"}"#);
    let (status, _) = send(app(), req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_voice_tts_validation() {
    let req = post("/agent/voice/?action=tts", "application/json", r#"{"text": ""}"#);
    let (status, body) = send(app(), req).await;
    assert_bad_request(status, &body, "Text field is required");

    let long = serde_json::json!({ "text": "a".repeat(501) }).to_string();
    let req = post("/agent/voice/?action=tts", "application/json", long);
    let (status, body) = send(app(), req).await;
    assert_bad_request(status, &body, "Text too long (max 500 characters)");
}

#[tokio::test]
async fn test_voice_engine_failure_is_500() {
    let failing = app_with(FakeSpeech {
        transcript: String::new(),
        fail: true,
    });
    let req = post("/agent/voice/?action=tts", "application/json", r#"{"text": "Hi"}"#);
    let (status, body) = send(failing, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "internal");
    assert_eq!(body["error"]["message"], "Text-to-speech failed");
}

#[tokio::test]
async fn test_voice_stt() {
    let (content_type, body) = multipart("audio", &[7u8; 16]);
    let (status, json) = send(app(), post("/agent/voice/?action=stt", &content_type, body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["text"], "show me laptops");

    let silent = app_with(FakeSpeech {
        transcript: String::new(),
        fail: false,
    });
    let (content_type, body) = multipart("audio", &[7u8; 16]);
    let (_, json) = send(silent, post("/agent/voice/?action=stt", &content_type, body)).await;
    assert_eq!(json["text"], UNINTELLIGIBLE);
}

#[tokio::test]
async fn test_voice_stt_validation() {
    let (content_type, body) = multipart("other", &[7u8; 16]);
    let (status, json) = send(app(), post("/agent/voice/?action=stt", &content_type, body)).await;
    assert_bad_request(status, &json, "No audio file provided");

    let (status, json) = send(
        app(),
        post("/agent/voice/?action=stt", "application/json", "{}"),
    )
    .await;
    assert_bad_request(status, &json, "No audio file provided");

    // The test app allows 64 bytes of audio.
    let (content_type, body) = multipart("audio", &[7u8; 65]);
    let (status, json) = send(app(), post("/agent/voice/?action=stt", &content_type, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Audio file too large"));
}

#[tokio::test]
async fn test_voice_unknown_action() {
    let req = post("/agent/voice/?action=sing", "application/json", "{}");
    let (status, body) = send(app(), req).await;
    assert_bad_request(status, &body, "Invalid action. Use ?action=tts or ?action=stt");
}
