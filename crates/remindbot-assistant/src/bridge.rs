//! Negotiates a cron expression with the user through a chat model.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use remindbot_config::AssistantConfig;
use remindbot_cron::{CronSchedule, validate_cron};
use remindbot_types::ChatId;

use crate::AssistantError;
use crate::client::{ChatTurn, CompletionClient, DeepSeekClient};
use crate::history::{ConversationStore, MemoryConversationStore};

/// Phrase the model uses to hand over a confirmed expression.
pub const CRON_SENTINEL: &str = "final cron is ";

pub const SYSTEM_PROMPT: &str = "You are an assistant that converts natural language schedules into valid 5-field cron \
expressions in UTC: Minutes, Hours, Day of Month, Month, Day of Week. Fields accept *, /, ,, and -; ? is allowed only \
in Day of Month and Day of Week. Minutes: 0-59, Hours: 0-23, Day of Month: 1-31, Month: 1-12 or JAN-DEC, Day of Week: \
0-6 or SUN-SAT (Sunday is 0). The smallest allowed interval is 1 minute (cron does not support seconds). If no timezone \
is provided, ask for the user's country to convert to UTC. Confirm the schedule only in natural language, never show \
the cron expression. Once confirmed, respond only with \"final cron is <cron expression>\" and nothing else. If the \
input is invalid, reply that the schedule is unsupported. In all cases, continue prompting the user for a valid natural \
language schedule and timezone until a valid and confirmed cron expression is produced. Keep all responses minimal and \
precise.";

/// Outcome of one negotiation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// The model settled on a valid expression; the conversation is over.
    Resolved(CronSchedule),
    /// Show this text to the user and wait for their answer.
    Reply(String),
}

/// Conversational bridge between a chat and the completion service.
pub struct Assistant {
    client: Arc<dyn CompletionClient>,
    history: Arc<dyn ConversationStore>,
    timeout: Duration,
}

impl Assistant {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        history: Arc<dyn ConversationStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            history,
            timeout,
        }
    }

    /// DeepSeek client with an in-memory history store.
    pub fn from_config(config: &AssistantConfig) -> Self {
        Self::new(
            Arc::new(DeepSeekClient::new(config)),
            Arc::new(MemoryConversationStore::new(config.cache_max_cost)),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Feed one user message into the chat's negotiation.
    ///
    /// History failures only cost context: the turn proceeds single-turn.
    /// Completion failures and timeouts are returned.
    pub async fn negotiate(&self, chat_id: ChatId, text: &str) -> Result<Negotiation, AssistantError> {
        let mut history = match self.history.get(chat_id).await {
            Ok(turns) => turns.unwrap_or_default(),
            Err(e) => {
                warn!(chat_id, "Conversation history unavailable, continuing without it: {e}");
                Vec::new()
            }
        };
        history.push(ChatTurn::user(text));

        let mut request = Vec::with_capacity(history.len() + 1);
        request.push(ChatTurn::system(SYSTEM_PROMPT));
        request.extend(history.iter().cloned());

        let reply = tokio::time::timeout(self.timeout, self.client.complete(&request))
            .await
            .map_err(|_| AssistantError::Timeout(self.timeout))??;

        if let Some(schedule) = extract_cron(&reply.content) {
            debug!(chat_id, cron = schedule.as_str(), "Cron negotiated");
            self.history.delete(chat_id).await;
            return Ok(Negotiation::Resolved(schedule));
        }

        history.push(ChatTurn::assistant(reply.content.clone()));
        if let Err(e) = self.history.set(chat_id, &history).await {
            warn!(chat_id, "Failed to store conversation history: {e}");
        }
        Ok(Negotiation::Reply(reply.content))
    }

    /// Forget the chat's conversation.
    pub async fn reset(&self, chat_id: ChatId) {
        self.history.delete(chat_id).await;
    }
}

/// Pull a valid expression out of a sentinel reply.
fn extract_cron(content: &str) -> Option<CronSchedule> {
    let (_, rest) = content.split_once(CRON_SENTINEL)?;
    let candidate = rest
        .trim()
        .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '“' | '”'))
        .trim_end_matches('.')
        .trim();
    validate_cron(candidate).ok()
}
