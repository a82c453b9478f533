//! Chat request orchestration.
//!
//! ```text
//! validate → persist user turn → fetch history → retrieve → compose prompt
//!          → call gateway → {reply | fallback} → persist agent turn
//!          → format history → respond
//! ```
//!
//! Only validation can fail a request. Persistence, history, retrieval and
//! gateway failures are logged and replaced by degraded defaults.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use salesbot_core::history::HistoryStore;
use salesbot_core::index::{ConversationIndex, ProductIndex};
use salesbot_core::lead::{classify, fallback_reply, Emotion, LeadStage};
use salesbot_core::models::{ConversationTurn, Sender};
use salesbot_core::prompt::{build_messages, compose_system_prompt};
use salesbot_core::retrieval::{list_categories, retrieve, RetrievalParams, RetrievalResult};

use crate::gateway::ChatCompletion;
use crate::history::format_timestamp;

pub const MAX_MESSAGE_CHARS: usize = 1000;
pub const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Error)]
pub enum ChatError {
    /// Rejected input; nothing was persisted.
    #[error("{0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Request body of `POST /agent/chat/`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub lead_stage: LeadStage,
    pub emotion: Emotion,
    pub history: Vec<HistoryEntry>,
    pub debug_info: DebugInfo,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct HistoryEntry {
    pub sender: Sender,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct DebugInfo {
    pub products_found: usize,
    pub search_successful: bool,
    pub api_used: bool,
    pub api_error: Option<String>,
}

/// Trim and bound-check a raw message.
pub fn validate_message(raw: Option<&str>) -> Result<String, ChatError> {
    let message = raw.unwrap_or_default().trim();
    if message.is_empty() {
        return Err(ChatError::Validation(
            "Message field is required and cannot be empty".to_string(),
        ));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::Validation(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(message.to_string())
}

/// Tunables for one [`ChatService`].
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub retrieval: RetrievalParams,
    pub prompt_turns: usize,
    pub response_turns: usize,
    pub offset: FixedOffset,
}

/// The process-wide orchestrator. Collaborators are injected once at startup.
pub struct ChatService {
    index: Arc<dyn ProductIndex>,
    history: Arc<dyn HistoryStore>,
    gateway: Arc<dyn ChatCompletion>,
    memory: Option<Arc<dyn ConversationIndex>>,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        index: Arc<dyn ProductIndex>,
        history: Arc<dyn HistoryStore>,
        gateway: Arc<dyn ChatCompletion>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            index,
            history,
            gateway,
            memory: None,
            settings,
        }
    }

    /// Mirror every completed exchange into `memory`.
    pub fn with_memory(mut self, memory: Arc<dyn ConversationIndex>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Run [`handle`](Self::handle) on its own task so a panic anywhere in
    /// the pipeline surfaces as [`ChatError::Internal`].
    pub async fn handle_isolated(
        self: Arc<Self>,
        request: ChatRequest,
    ) -> Result<ChatResponse, ChatError> {
        let task = tokio::spawn(async move {
            self.handle(request.message.as_deref(), request.session_id.as_deref())
                .await
        });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(ChatError::Internal(anyhow::anyhow!(
                "chat pipeline aborted: {}",
                e
            ))),
        }
    }

    pub async fn handle(
        &self,
        message: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<ChatResponse, ChatError> {
        let message = validate_message(message)?;
        let session_id = session_id.unwrap_or(DEFAULT_SESSION);
        let preview: String = message.chars().take(50).collect();
        tracing::info!(session_id, message = %preview, "processing chat message");

        if let Err(e) = self.history.append(session_id, Sender::User, &message).await {
            tracing::error!(session_id, error = %e, "failed to save user message");
        }

        let prompt_history = match self
            .history
            .recent(session_id, self.settings.prompt_turns)
            .await
        {
            Ok(turns) => turns,
            Err(e) => {
                tracing::error!(session_id, error = %e, "failed to load history");
                Vec::new()
            }
        };

        let retrieval = self.retrieve(&message).await;
        tracing::info!(session_id, products = retrieval.count, "product search complete");

        let system_prompt = compose_system_prompt(&retrieval);
        let messages = build_messages(&system_prompt, &prompt_history, &message);

        let (reply, lead_stage, emotion, api_error) = match self.gateway.complete(&messages).await
        {
            Ok(reply) => {
                let (stage, emotion) = classify(retrieval.count);
                (reply, stage, emotion, None)
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "gateway failed, using fallback reply");
                let (reply, stage, emotion) =
                    fallback_reply(&retrieval.products, retrieval.categories.as_deref());
                (reply, stage, emotion, Some(e.to_string()))
            }
        };

        if let Err(e) = self.history.append(session_id, Sender::Agent, &reply).await {
            tracing::error!(session_id, error = %e, "failed to save agent reply");
        }

        if let Some(memory) = &self.memory {
            if let Err(e) = memory.remember(session_id, &message, &reply).await {
                tracing::warn!(session_id, error = %e, "failed to mirror exchange to memory");
            }
        }

        let history = match self
            .history
            .recent(session_id, self.settings.response_turns)
            .await
        {
            Ok(turns) => self.format_history(&turns),
            Err(e) => {
                tracing::error!(session_id, error = %e, "failed to format history");
                Vec::new()
            }
        };

        Ok(ChatResponse {
            reply,
            lead_stage,
            emotion,
            history,
            debug_info: DebugInfo {
                products_found: retrieval.count,
                search_successful: retrieval.found,
                api_used: api_error.is_none(),
                api_error,
            },
        })
    }

    /// Retrieval never fails a request: an error degrades to "not found",
    /// keeping whatever category list can still be fetched.
    async fn retrieve(&self, message: &str) -> RetrievalResult {
        match retrieve(self.index.as_ref(), message, &self.settings.retrieval).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "product retrieval failed");
                let categories =
                    list_categories(self.index.as_ref(), self.settings.retrieval.category_sample_size)
                        .await
                        .map_err(|e| tracing::error!(error = %e, "category listing failed"))
                        .ok();
                RetrievalResult::not_found(categories)
            }
        }
    }

    fn format_history(&self, turns: &[ConversationTurn]) -> Vec<HistoryEntry> {
        turns
            .iter()
            .map(|t| HistoryEntry {
                sender: t.sender,
                message: t.message.clone(),
                timestamp: format_timestamp(&t.created_at, &self.settings.offset),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use async_trait::async_trait;
    use salesbot_core::history::InMemoryHistory;
    use salesbot_core::index::memory::InMemoryIndex;
    use salesbot_core::index::MetadataFilter;
    use salesbot_core::models::{Product, ProductDocument};
    use salesbot_core::prompt::ChatMessage;
    use std::sync::Mutex;

    struct Scripted {
        outcome: Result<String, GatewayError>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Scripted {
        fn new(outcome: Result<String, GatewayError>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatCompletion for Scripted {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GatewayError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.outcome.clone()
        }
    }

    struct Broken;

    #[async_trait]
    impl ProductIndex for Broken {
        async fn search(
            &self,
            _q: &str,
            _k: usize,
            _f: Option<&MetadataFilter>,
        ) -> anyhow::Result<Vec<ProductDocument>> {
            anyhow::bail!("index offline")
        }
        async fn get_by_filter(
            &self,
            _f: Option<&MetadataFilter>,
            _l: usize,
        ) -> anyhow::Result<Vec<ProductDocument>> {
            anyhow::bail!("index offline")
        }
        async fn count(&self) -> anyhow::Result<usize> {
            anyhow::bail!("index offline")
        }
    }

    fn settings() -> ChatSettings {
        ChatSettings {
            retrieval: RetrievalParams::default(),
            prompt_turns: 10,
            response_turns: 50,
            offset: FixedOffset::east_opt(5 * 3600).unwrap(),
        }
    }

    fn laptop(name: &str, price: f64) -> Product {
        Product {
            name: name.to_string(),
            category: "Laptops".to_string(),
            model: name.to_uppercase().replace(' ', "-"),
            price,
            billing_ref: None,
            attributes: Default::default(),
        }
    }

    #[test]
    fn test_validate_message() {
        assert_eq!(validate_message(Some("  hi  ")).unwrap(), "hi");
        assert!(matches!(validate_message(None), Err(ChatError::Validation(_))));
        assert!(matches!(
            validate_message(Some("   ")),
            Err(ChatError::Validation(_))
        ));
        let long = "é".repeat(1001);
        let err = validate_message(Some(&long)).unwrap_err();
        assert_eq!(err.to_string(), "Message too long (max 1000 characters)");
        assert!(validate_message(Some(&"é".repeat(1000))).is_ok());
    }

    #[tokio::test]
    async fn test_success_uses_model_reply_and_history() {
        let index = Arc::new(InMemoryIndex::with_products(&[laptop("Aero 14", 800.0)]));
        let history = Arc::new(InMemoryHistory::new());
        let gateway = Scripted::new(Ok("Here you go".to_string()));
        let service = ChatService::new(index, history.clone(), gateway.clone(), settings());

        let resp = service.handle(Some("aero please"), Some("s1")).await.unwrap();
        assert_eq!(resp.reply, "Here you go");
        assert_eq!(resp.lead_stage, LeadStage::Hot);
        assert_eq!(resp.emotion, Emotion::Helpful);
        assert!(resp.debug_info.api_used);
        assert_eq!(resp.debug_info.api_error, None);
        assert_eq!(resp.history.len(), 2);
        assert_eq!(resp.history[0].sender, Sender::User);
        assert_eq!(resp.history[1].message, "Here you go");

        // The current message is sent once, last.
        let seen = gateway.seen.lock().unwrap();
        let sent = &seen[0];
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].content, "aero please");
    }

    #[tokio::test]
    async fn test_default_session() {
        let service = ChatService::new(
            Arc::new(InMemoryIndex::new()),
            Arc::new(InMemoryHistory::new()),
            Scripted::new(Ok("ok".to_string())),
            settings(),
        );
        service.handle(Some("hello"), None).await.unwrap();
        let resp = service.handle(Some("again"), None).await.unwrap();
        assert_eq!(resp.history.len(), 4);
    }

    #[tokio::test]
    async fn test_gateway_failure_falls_back_to_products() {
        let index = Arc::new(InMemoryIndex::with_products(&[
            laptop("Aero 14", 800.0),
            laptop("Aero 15", 950.0),
        ]));
        let service = ChatService::new(
            index,
            Arc::new(InMemoryHistory::new()),
            Scripted::new(Err(GatewayError::RateLimited)),
            settings(),
        );
        let resp = service.handle(Some("any laptops?"), Some("s")).await.unwrap();
        assert_eq!(resp.lead_stage, LeadStage::Warm);
        assert!(resp.reply.contains("• Aero 14 - $800 (Laptops)"));
        assert!(!resp.debug_info.api_used);
        assert_eq!(
            resp.debug_info.api_error.as_deref(),
            Some("Rate limit exceeded. Please try again later.")
        );
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades() {
        let service = ChatService::new(
            Arc::new(Broken),
            Arc::new(InMemoryHistory::new()),
            Scripted::new(Err(GatewayError::Timeout)),
            settings(),
        );
        let resp = service.handle(Some("laptops"), Some("s")).await.unwrap();
        assert_eq!(resp.lead_stage, LeadStage::Curious);
        assert_eq!(resp.emotion, Emotion::Neutral);
        assert!(!resp.debug_info.search_successful);
        assert!(resp.reply.starts_with("I'm here to help you find the perfect tech products!"));
    }

    #[tokio::test]
    async fn test_validation_has_no_side_effects() {
        let history = Arc::new(InMemoryHistory::new());
        let gateway = Scripted::new(Ok("x".to_string()));
        let service = ChatService::new(
            Arc::new(InMemoryIndex::new()),
            history.clone(),
            gateway.clone(),
            settings(),
        );
        let long = "a".repeat(1001);
        assert!(service.handle(Some(&long), Some("s")).await.is_err());
        assert!(history.is_empty());
        assert!(gateway.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_mirrored_to_memory() {
        let memory = Arc::new(InMemoryIndex::new());
        let service = ChatService::new(
            Arc::new(InMemoryIndex::new()),
            Arc::new(InMemoryHistory::new()),
            Scripted::new(Ok("hello!".to_string())),
            settings(),
        )
        .with_memory(memory.clone());
        service.handle(Some("hi"), Some("s9")).await.unwrap();
        assert_eq!(memory.memory_ids("s9"), vec!["s9-1"]);
        assert_eq!(
            memory.recall("s9", 5).await.unwrap(),
            vec!["User: hi\nBot: hello!".to_string()]
        );
    }
}
