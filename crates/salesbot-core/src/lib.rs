//! # Salesbot Core
//!
//! Runtime-agnostic logic for the sales assistant: catalog models, the
//! product and conversation index traits, the intent and retrieval
//! heuristics, system prompt composition, and lead scoring.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! `salesbot` app crate supplies the SQLite-backed index, the embedding
//! providers, and the chat-completion gateway.

pub mod embedding;
pub mod history;
pub mod index;
pub mod lead;
pub mod models;
pub mod prompt;
pub mod retrieval;
