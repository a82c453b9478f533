//! System prompt composition and chat message assembly.
//!
//! [`compose_system_prompt`] is a pure function of the retrieval result:
//! the same input always renders the same bytes.

use serde::{Deserialize, Serialize};

use crate::models::{ConversationTurn, Sender};
use crate::retrieval::RetrievalResult;

const BASE_PROMPT: &str = "You are an expert AI sales agent for a technology store.
You are helpful, knowledgeable, and focused on helping customers find the perfect tech products.

GUIDELINES:
- Always be conversational and engaging
- If products are found, present them clearly with specs & price
- Always mention prices
- Ask follow-up questions
- Highlight differences when comparing products
- Format with line breaks for readability
";

/// Used when no categories are known or listing them failed.
pub const GENERIC_CATEGORIES: &str = "various tech products";

/// Chat-completion role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl From<Sender> for Role {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::User => Role::User,
            Sender::Agent => Role::Assistant,
        }
    }
}

/// One entry of an OpenAI-compatible `messages` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Render the system instruction for one request.
pub fn compose_system_prompt(result: &RetrievalResult) -> String {
    let section = if result.found {
        format!(
            "
Relevant products found ({} matches):
{}

Your job:
1. Acknowledge what the customer is asking
2. Present the most relevant products with highlights
3. Suggest why each one is useful
4. End with a helpful follow-up question
",
            result.count, result.context
        )
    } else {
        format!(
            "
No exact products were found.

Your job:
1. Acknowledge the customer's request
2. Suggest alternatives or categories
3. Ask clarifying questions
4. Mention available categories: {}
",
            category_list(result.categories.as_deref())
        )
    };
    format!("{}{}", BASE_PROMPT, section)
}

/// Comma-joined categories, or [`GENERIC_CATEGORIES`] when there are none.
pub fn category_list(categories: Option<&[String]>) -> String {
    match categories {
        Some(c) if !c.is_empty() => c.join(", "),
        _ => GENERIC_CATEGORIES.to_string(),
    }
}

/// Assemble `[system, history.., user]` for the gateway.
///
/// The current user message has usually been persisted before history is
/// fetched; when the last history turn is that same user message it is not
/// repeated.
pub fn build_messages(
    system_prompt: &str,
    history: &[ConversationTurn],
    user_message: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::new(Role::System, system_prompt));

    let already_last = history
        .last()
        .is_some_and(|t| t.sender == Sender::User && t.message == user_message);
    let replay = if already_last {
        &history[..history.len() - 1]
    } else {
        history
    };
    messages.extend(
        replay
            .iter()
            .map(|t| ChatMessage::new(t.sender.into(), t.message.clone())),
    );
    messages.push(ChatMessage::new(Role::User, user_message));
    messages
}
