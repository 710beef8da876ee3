//! remindbot-assistant: AI-assisted cron negotiation.
//!
//! A chat model talks the user through their schedule and hands back a cron
//! expression once both sides agree. Per-chat history is kept in a
//! [`ConversationStore`] between turns.

pub mod bridge;
pub mod client;
pub mod history;

use std::time::Duration;

pub use bridge::{Assistant, CRON_SENTINEL, Negotiation, SYSTEM_PROMPT};
pub use client::{ChatTurn, CompletionClient, DeepSeekClient, Role};
pub use history::{ConversationStore, MemoryConversationStore};

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("completion API returned no choices")]
    EmptyResponse,
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("history serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("history entry of {cost} bytes exceeds cache capacity of {max_cost}")]
    CacheRejected { cost: usize, max_cost: usize },
}
