//! Text-to-speech and speech-to-text behind the [`SpeechEngine`] trait.
//!
//! The `openai` provider speaks the OpenAI audio API (`/audio/speech`,
//! `/audio/transcriptions`), which several hosted and self-hosted engines
//! also implement. `disabled` fails every call.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::VoiceConfig;

/// Returned by the voice endpoint when transcription yields no text.
pub const UNINTELLIGIBLE: &str = "Sorry, I could not understand the audio.";

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech provider is disabled")]
    Disabled,
    #[error("speech credential not set: {0}")]
    MissingCredential(String),
    #[error("speech API returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("speech API response was malformed: {0}")]
    Malformed(String),
    #[error("speech transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Spoken rendering of `text` as encoded audio bytes (MP3).
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError>;

    /// Transcription of an uploaded audio file. May be empty.
    async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> Result<String, SpeechError>;
}

pub fn create_engine(config: &VoiceConfig) -> anyhow::Result<Arc<dyn SpeechEngine>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledSpeech)),
        "openai" => Ok(Arc::new(OpenAiSpeech::from_config(config)?)),
        other => anyhow::bail!("Unknown voice provider: {}", other),
    }
}

pub struct DisabledSpeech;

#[async_trait]
impl SpeechEngine for DisabledSpeech {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, SpeechError> {
        Err(SpeechError::Disabled)
    }

    async fn transcribe(&self, _audio: Vec<u8>, _filename: &str) -> Result<String, SpeechError> {
        Err(SpeechError::Disabled)
    }
}

pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    key_env: String,
    tts_model: String,
    tts_voice: String,
    stt_model: String,
}

impl OpenAiSpeech {
    pub fn from_config(config: &VoiceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var(&config.api_key_env).ok(),
            key_env: config.api_key_env.clone(),
            tts_model: config.tts_model.clone(),
            tts_voice: config.tts_voice.clone(),
            stt_model: config.stt_model.clone(),
        })
    }

    fn key(&self) -> Result<&str, SpeechError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| SpeechError::MissingCredential(self.key_env.clone()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SpeechError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(SpeechError::Status {
        status: status.as_u16(),
        detail,
    })
}

#[async_trait]
impl SpeechEngine for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        let body = serde_json::json!({
            "model": self.tts_model,
            "voice": self.tts_voice,
            "input": text,
            "response_format": "mp3",
        });
        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(self.key()?)
            .json(&body)
            .send()
            .await?;
        let bytes = check_status(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn transcribe(&self, audio: Vec<u8>, filename: &str) -> Result<String, SpeechError> {
        let part = reqwest::multipart::Part::bytes(audio).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("model", self.stt_model.clone())
            .part("file", part);
        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.key()?)
            .multipart(form)
            .send()
            .await?;
        let json: serde_json::Value = check_status(response).await?.json().await?;
        json.get("text")
            .and_then(|t| t.as_str())
            .map(|t| t.trim().to_string())
            .ok_or_else(|| SpeechError::Malformed("missing `text` field".to_string()))
    }
}
