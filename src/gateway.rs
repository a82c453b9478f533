//! Chat-completion gateway.
//!
//! One POST to an OpenAI-compatible `/chat/completions` endpoint per call,
//! no retries. Every failure is mapped to a [`GatewayError`] so the
//! orchestrator can pick a fallback reply; nothing here panics or leaks a
//! transport error type.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use salesbot_core::prompt::ChatMessage;

use crate::config::LlmConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("API key not configured. Please set {0} environment variable.")]
    MissingCredential(String),
    #[error("Invalid message format")]
    EmptyMessages,
    #[error("Invalid API response format")]
    InvalidResponse,
    #[error("Failed to parse API response")]
    Unparseable,
    #[error("Invalid API key. Please check your {0}.")]
    Unauthorized(String),
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("API returned status {0}")]
    Status(u16),
    #[error("API timeout - please try again")]
    Timeout,
    #[error("Connection error - please check your internet connection")]
    Connection,
    #[error("API error: {0}")]
    Other(String),
}

/// Anything that can turn a message list into a reply.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GatewayError>;
}

/// HTTP gateway to the configured provider.
pub struct LlmGateway {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    key_env: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmGateway {
    /// Build from config, reading the credential from `config.api_key_env`.
    /// A missing credential is not an error here; `complete` reports it.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "LLM credential not set; replies will use fallbacks");
        }
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &LlmConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            key_env: config.api_key_env.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ChatCompletion for LlmGateway {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GatewayError> {
        let Some(api_key) = &self.api_key else {
            tracing::error!(env = %self.key_env, "LLM credential is not set");
            return Err(GatewayError::MissingCredential(self.key_env.clone()));
        };
        if messages.is_empty() {
            return Err(GatewayError::EmptyMessages);
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        tracing::info!(messages = messages.len(), model = %self.model, "calling chat completion");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        tracing::info!(status = status.as_u16(), "chat completion responded");

        match status.as_u16() {
            200 => {
                let text = response.text().await.map_err(map_transport_error)?;
                parse_completion(&text)
            }
            401 => {
                tracing::error!("chat completion rejected credential");
                Err(GatewayError::Unauthorized(self.key_env.clone()))
            }
            429 => {
                tracing::error!("chat completion rate limited");
                Err(GatewayError::RateLimited)
            }
            code => {
                let detail = response.text().await.unwrap_or_default();
                tracing::error!(status = code, detail = %detail, "chat completion failed");
                Err(GatewayError::Status(code))
            }
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        tracing::error!("chat completion timed out");
        GatewayError::Timeout
    } else if e.is_connect() {
        tracing::error!(error = %e, "chat completion connection failed");
        GatewayError::Connection
    } else {
        tracing::error!(error = %e, "chat completion transport error");
        GatewayError::Other(e.to_string())
    }
}

/// Pull `choices[0].message.content` out of a 200 body.
fn parse_completion(body: &str) -> Result<String, GatewayError> {
    let json: serde_json::Value =
        serde_json::from_str(body).map_err(|_| GatewayError::Unparseable)?;
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            tracing::error!("chat completion payload has no choices");
            GatewayError::InvalidResponse
        })
}
