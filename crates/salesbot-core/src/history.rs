//! Append-only conversation history.
//!
//! Turns are never updated or deleted. [`HistoryStore::recent`] returns the
//! newest `limit` turns of a session in chronological order (oldest first),
//! ordering by `(created_at, insertion order)`.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{ConversationTurn, Sender};

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a turn; the store assigns the timestamp.
    async fn append(
        &self,
        session_id: &str,
        sender: Sender,
        message: &str,
    ) -> Result<ConversationTurn>;

    /// Last `limit` turns for `session_id`, oldest first.
    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>>;
}

/// Vec-backed history for tests.
#[derive(Default)]
pub struct InMemoryHistory {
    turns: RwLock<Vec<ConversationTurn>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total turns across all sessions.
    pub fn len(&self) -> usize {
        self.turns.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn append(
        &self,
        session_id: &str,
        sender: Sender,
        message: &str,
    ) -> Result<ConversationTurn> {
        let turn = ConversationTurn {
            session_id: session_id.to_string(),
            sender,
            message: message.to_string(),
            created_at: Utc::now(),
        };
        self.turns.write().unwrap().push(turn.clone());
        Ok(turn)
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        let turns = self.turns.read().unwrap();
        let mut mine: Vec<ConversationTurn> = turns
            .iter()
            .rev()
            .filter(|t| t.session_id == session_id)
            .take(limit)
            .cloned()
            .collect();
        mine.reverse();
        Ok(mine)
    }
}
