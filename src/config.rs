use anyhow::{Context, Result};
use chrono::FixedOffset;
use salesbot_core::retrieval::RetrievalParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_general_top_k")]
    pub general_top_k: usize,
    #[serde(default = "default_category_top_k")]
    pub category_top_k: usize,
    #[serde(default = "default_sample_size")]
    pub category_sample_size: usize,
    #[serde(default = "default_sample_size")]
    pub price_sample_size: usize,
    #[serde(default = "default_general_top_k")]
    pub price_top_k: usize,
    #[serde(default = "default_general_top_k")]
    pub context_items: usize,
    #[serde(default = "default_description_chars")]
    pub description_chars: usize,
    #[serde(default = "default_price_band")]
    pub default_price_band: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            general_top_k: default_general_top_k(),
            category_top_k: default_category_top_k(),
            category_sample_size: default_sample_size(),
            price_sample_size: default_sample_size(),
            price_top_k: default_general_top_k(),
            context_items: default_general_top_k(),
            description_chars: default_description_chars(),
            default_price_band: default_price_band(),
        }
    }
}

fn default_general_top_k() -> usize {
    5
}
fn default_category_top_k() -> usize {
    6
}
fn default_sample_size() -> usize {
    100
}
fn default_description_chars() -> usize {
    150
}
fn default_price_band() -> u64 {
    500
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            general_top_k: self.general_top_k,
            category_top_k: self.category_top_k,
            category_sample_size: self.category_sample_size,
            price_sample_size: self.price_sample_size,
            price_top_k: self.price_top_k,
            context_items: self.context_items,
            description_chars: self.description_chars,
            default_price_band: self.default_price_band,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local` (fastembed, the default), `openai`, `ollama`, or `disabled`
    /// for keyword-only ranking.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_voice_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Chat-completion gateway settings. Any OpenAI-compatible endpoint works.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Environment variable holding the bearer credential.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_llm_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    /// Turns replayed to the model.
    #[serde(default = "default_prompt_turns")]
    pub prompt_turns: usize,
    /// Turns returned to the client.
    #[serde(default = "default_response_turns")]
    pub response_turns: usize,
    /// Offset used to render timestamps, e.g. `"+05:00"`.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    /// Also write each exchange into the conversation memory collection.
    #[serde(default)]
    pub mirror_to_index: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            prompt_turns: default_prompt_turns(),
            response_turns: default_response_turns(),
            utc_offset: default_utc_offset(),
            mirror_to_index: false,
        }
    }
}

fn default_prompt_turns() -> usize {
    10
}
fn default_response_turns() -> usize {
    50
}
fn default_utc_offset() -> String {
    "+05:00".to_string()
}

impl HistoryConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VoiceConfig {
    #[serde(default = "default_voice_provider")]
    pub provider: String,
    #[serde(default = "default_voice_base_url")]
    pub base_url: String,
    #[serde(default = "default_voice_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default = "default_max_audio_bytes")]
    pub max_audio_bytes: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            provider: default_voice_provider(),
            base_url: default_voice_base_url(),
            api_key_env: default_voice_key_env(),
            tts_model: default_tts_model(),
            tts_voice: default_tts_voice(),
            stt_model: default_stt_model(),
            timeout_secs: default_timeout_secs(),
            max_text_chars: default_max_text_chars(),
            max_audio_bytes: default_max_audio_bytes(),
        }
    }
}

fn default_voice_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_voice_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_tts_model() -> String {
    "tts-1".to_string()
}
fn default_tts_voice() -> String {
    "alloy".to_string()
}
fn default_stt_model() -> String {
    "whisper-1".to_string()
}
fn default_max_text_chars() -> usize {
    500
}
fn default_max_audio_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    /// Default catalog file for `salesbot load`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Parse `[+-]HH:MM` into a fixed offset.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => anyhow::bail!("utc offset must start with '+' or '-': '{}'", s),
    };
    let (h, m) = rest
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("utc offset must look like +HH:MM: '{}'", s))?;
    let hours: i32 = h.parse().with_context(|| format!("bad hours in '{}'", s))?;
    let minutes: i32 = m.parse().with_context(|| format!("bad minutes in '{}'", s))?;
    if hours > 23 || minutes > 59 {
        anyhow::bail!("utc offset out of range: '{}'", s);
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow::anyhow!("utc offset out of range: '{}'", s))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    let r = &config.retrieval;
    if r.general_top_k == 0 || r.category_top_k == 0 || r.price_top_k == 0 {
        anyhow::bail!("retrieval top_k values must be >= 1");
    }
    if r.context_items == 0 {
        anyhow::bail!("retrieval.context_items must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Validate llm
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.max_tokens == 0 {
        anyhow::bail!("llm.max_tokens must be > 0");
    }

    // Validate history
    if config.history.prompt_turns == 0 || config.history.response_turns == 0 {
        anyhow::bail!("history turn limits must be >= 1");
    }
    config.history.offset()?;

    match config.voice.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown voice provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
