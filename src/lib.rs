//! # Salesbot
//!
//! Backend for an embeddable sales chat widget. A customer message is turned
//! into a product retrieval (similarity search plus category and price
//! overrides), composed into a grounded system prompt, sent to an
//! OpenAI-compatible chat-completion API, and answered with a reply and
//! lead-scoring metadata. Voice and call-signaling endpoints sit alongside.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐
//! │ catalog  │──▶│ SqliteIndex  │◀──│ ChatService │──▶ LlmGateway
//! │  (load)  │   │ FTS5 + Vec   │   │ (retrieval, │
//! └──────────┘   └──────────────┘   │  prompt)    │──▶ SqliteHistory
//!                                   └──────▲──────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 │(salesbot)│       │  (axum)  │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! Pure logic (models, retrieval, prompts, lead scoring) lives in
//! `salesbot-core`; this crate supplies storage, network clients and the
//! server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`sqlite_index`] | Product and memory collections in SQLite |
//! | [`history`] | Conversation turn store |
//! | [`catalog`] | Catalog validation and publishing |
//! | [`gateway`] | Chat-completion client |
//! | [`voice`] | Text-to-speech and speech-to-text |
//! | [`chat`] | Request orchestration |
//! | [`signaling`] | WebRTC call signaling relay |
//! | [`server`] | HTTP server |
//! | [`search`] | `salesbot search` |
//! | [`stats`] | `salesbot stats` |

pub mod catalog;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod gateway;
pub mod history;
pub mod migrate;
pub mod search;
pub mod server;
pub mod signaling;
pub mod sqlite_index;
pub mod stats;
pub mod voice;
