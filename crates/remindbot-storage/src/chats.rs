//! Per-chat draft context.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use remindbot_types::ChatId;

use crate::Result;

/// String-keyed blob describing where a chat is in the reminder form.
///
/// Stored as a JSON object. Interpretation of the keys belongs to the form
/// state machine; storage only moves the map in and out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatContext(BTreeMap<String, String>);

impl ChatContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ChatContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A live row of the `chats` table.
#[derive(Debug, Clone)]
pub struct ChatRecord {
    pub chat_id: ChatId,
    pub context: ChatContext,
    pub updated_at: DateTime<Utc>,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Get the live chat row.
pub fn get_live(conn: &Connection, chat_id: ChatId) -> Result<Option<ChatRecord>> {
    let row = conn
        .query_row(
            "SELECT chat_id, context, updated_at FROM chats
             WHERE chat_id = ?1 AND deleted_at IS NULL",
            rusqlite::params![chat_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((chat_id, context, updated_at)) => Ok(Some(ChatRecord {
            chat_id,
            context: ChatContext::from_json(&context)?,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })),
        None => Ok(None),
    }
}

/// Create the chat or reset it to an empty context.
pub fn reset(conn: &Connection, chat_id: ChatId) -> Result<ChatRecord> {
    let ts = now();
    conn.execute(
        "INSERT INTO chats (chat_id, context, created_at, updated_at, deleted_at)
         VALUES (?1, '{}', ?2, ?2, NULL)
         ON CONFLICT(chat_id) DO UPDATE SET
            context = '{}',
            updated_at = excluded.updated_at,
            deleted_at = NULL",
        rusqlite::params![chat_id, ts],
    )?;
    Ok(ChatRecord {
        chat_id,
        context: ChatContext::new(),
        updated_at: Utc::now(),
    })
}

/// Overwrite the context of a live chat.
pub fn update_context(conn: &Connection, chat_id: ChatId, context: &ChatContext) -> Result<bool> {
    let count = conn.execute(
        "UPDATE chats SET context = ?1, updated_at = ?2
         WHERE chat_id = ?3 AND deleted_at IS NULL",
        rusqlite::params![context.to_json()?, now(), chat_id],
    )?;
    Ok(count > 0)
}

/// Tombstone the chat once its form has been turned into a job.
pub fn consume(conn: &Connection, chat_id: ChatId) -> Result<bool> {
    let ts = now();
    let count = conn.execute(
        "UPDATE chats SET deleted_at = ?1, updated_at = ?1
         WHERE chat_id = ?2 AND deleted_at IS NULL",
        rusqlite::params![ts, chat_id],
    )?;
    Ok(count > 0)
}
