//! Per-chat conversation history with a byte-cost bound.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use remindbot_types::ChatId;

use crate::AssistantError;
use crate::client::ChatTurn;

/// Storage for the turns of an ongoing negotiation, keyed by chat.
///
/// Values are the JSON-serialized turn list; implementations may evict
/// entries at any time, so a miss just means a fresh conversation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, chat_id: ChatId) -> Result<Option<Vec<ChatTurn>>, AssistantError>;
    async fn set(&self, chat_id: ChatId, turns: &[ChatTurn]) -> Result<(), AssistantError>;
    async fn delete(&self, chat_id: ChatId);
}

struct Entry {
    value: String,
    written: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<ChatId, Entry>,
    total_cost: usize,
    clock: u64,
}

/// In-process store. The cost of an entry is the length of its JSON value;
/// when the total exceeds `max_cost` the least recently written entries go.
pub struct MemoryConversationStore {
    inner: Mutex<Inner>,
    max_cost: usize,
}

impl MemoryConversationStore {
    pub fn new(max_cost: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_cost,
        }
    }

    /// Current total cost of cached entries.
    pub async fn cost(&self) -> usize {
        self.inner.lock().await.total_cost
    }
}

impl Inner {
    fn remove(&mut self, chat_id: ChatId) {
        if let Some(old) = self.entries.remove(&chat_id) {
            self.total_cost -= old.value.len();
        }
    }

    fn evict_until(&mut self, max_cost: usize) {
        while self.total_cost > max_cost {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.written)
                .map(|(k, _)| *k)
            else {
                break;
            };
            tracing::debug!(chat_id = oldest, "Evicting conversation history");
            self.remove(oldest);
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get(&self, chat_id: ChatId) -> Result<Option<Vec<ChatTurn>>, AssistantError> {
        let inner = self.inner.lock().await;
        match inner.entries.get(&chat_id) {
            Some(entry) => Ok(Some(serde_json::from_str(&entry.value)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, chat_id: ChatId, turns: &[ChatTurn]) -> Result<(), AssistantError> {
        let value = serde_json::to_string(turns)?;
        let cost = value.len();
        if cost > self.max_cost {
            // The cached turns are now stale; a later turn must not replay them.
            self.inner.lock().await.remove(chat_id);
            return Err(AssistantError::CacheRejected {
                cost,
                max_cost: self.max_cost,
            });
        }

        let mut inner = self.inner.lock().await;
        inner.remove(chat_id);
        inner.clock += 1;
        let written = inner.clock;
        inner.entries.insert(chat_id, Entry { value, written });
        inner.total_cost += cost;
        inner.evict_until(self.max_cost);
        Ok(())
    }

    async fn delete(&self, chat_id: ChatId) {
        self.inner.lock().await.remove(chat_id);
    }
}
