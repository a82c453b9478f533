//! Index abstraction for the product catalog and conversation memory.
//!
//! Two logical collections sit behind these traits:
//!
//! | Collection | Trait | Backends |
//! |------------|-------|----------|
//! | products | [`ProductIndex`] | [`memory::InMemoryIndex`], `SqliteIndex` (app crate) |
//! | conversation memory | [`ConversationIndex`] | [`memory::InMemoryIndex`], `SqliteIndex` (app crate) |
//!
//! Implementations must be `Send + Sync` so one instance can be shared by
//! every request handler.
//!
//! # Ordering
//!
//! [`ProductIndex::search`] orders by descending relevance. Ties keep the
//! backend's native order, which is not guaranteed to be stable across
//! reloads; callers must not rely on it.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::ProductDocument;

/// Exact-match condition on one product metadata field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    pub field: String,
    pub value: String,
}

impl MetadataFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Filter on the `category` field.
    pub fn category(value: impl Into<String>) -> Self {
        Self::new("category", value)
    }

    /// Whether `doc` satisfies this filter. Non-string metadata values are
    /// compared by their JSON rendering.
    pub fn matches(&self, doc: &ProductDocument) -> bool {
        let p = &doc.product;
        match self.field.as_str() {
            "name" => p.name == self.value,
            "category" => p.category == self.value,
            "model" => p.model == self.value,
            "price" => crate::models::format_price(p.price) == self.value,
            "stripe_price_id" => p.billing_ref.as_deref() == Some(self.value.as_str()),
            other => match p.attributes.get(other) {
                Some(serde_json::Value::String(s)) => *s == self.value,
                Some(v) => v.to_string() == self.value,
                None => false,
            },
        }
    }
}

/// Read access to the product collection.
#[async_trait]
pub trait ProductIndex: Send + Sync {
    /// Nearest products to `query`, best first, at most `top_k`.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ProductDocument>>;

    /// Products matching `filter` (or any product when `None`) in index
    /// order, at most `limit`.
    async fn get_by_filter(
        &self,
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> Result<Vec<ProductDocument>>;

    /// Number of products currently published.
    async fn count(&self) -> Result<usize>;
}

/// Per-session memory of past exchanges, kept next to the product index.
#[async_trait]
pub trait ConversationIndex: Send + Sync {
    /// Store one exchange as `"User: ..\nBot: .."` under id
    /// `{session_id}-{n}` and return the id.
    async fn remember(&self, session_id: &str, user_message: &str, reply: &str)
        -> Result<String>;

    /// Up to `limit` remembered exchanges for a session, oldest first.
    async fn recall(&self, session_id: &str, limit: usize) -> Result<Vec<String>>;

    /// Total remembered exchanges across sessions.
    async fn memory_count(&self) -> Result<usize>;
}

/// Text stored for one remembered exchange.
pub fn memory_document(user_message: &str, reply: &str) -> String {
    format!("User: {}\nBot: {}", user_message, reply)
}
