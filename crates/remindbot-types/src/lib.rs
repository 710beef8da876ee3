use std::fmt;

use serde::{Deserialize, Serialize};

/// Chat identifier on the messaging platform.
pub type ChatId = i64;

/// Message identifier within a chat.
pub type MessageId = i64;

// ──────────────────── Inbound Events ────────────────────

/// Event delivered by the messaging gateway to the dispatch loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Free-text message (commands included).
    TextMessage {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        /// Display name of the sender.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
    },
    /// Inline button press.
    CallbackAction {
        chat_id: ChatId,
        /// Message carrying the pressed button.
        message_id: MessageId,
        callback_id: String,
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
    },
}

impl InboundEvent {
    /// Chat the event originated from.
    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::TextMessage { chat_id, .. } | Self::CallbackAction { chat_id, .. } => *chat_id,
        }
    }

    /// Sender display name, or `"unknown"`.
    pub fn sender_name(&self) -> &str {
        match self {
            Self::TextMessage { sender_name, .. } | Self::CallbackAction { sender_name, .. } => {
                sender_name.as_deref().unwrap_or("unknown")
            }
        }
    }
}

// ──────────────────── Inline Actions ────────────────────

/// Callback payloads attached to inline buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackData {
    /// Once-off job type selected.
    Scheduled,
    /// Recurring job type selected.
    Periodic,
    /// Confirmation of a completed form.
    ConfirmJob,
}

impl CallbackData {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Periodic => "periodic",
            Self::ConfirmJob => "confirm-job",
        }
    }

    /// Parse raw callback data; `None` for anything unrecognised.
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "scheduled" => Some(Self::Scheduled),
            "periodic" => Some(Self::Periodic),
            "confirm-job" => Some(Self::ConfirmJob),
            _ => None,
        }
    }
}

/// A button rendered under a rich message. Each action occupies its own row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineAction {
    pub label: String,
    pub data: String,
}

impl InlineAction {
    pub fn new(label: impl Into<String>, data: CallbackData) -> Self {
        Self {
            label: label.into(),
            data: data.as_str().to_string(),
        }
    }
}

// ──────────────────── Scheduling ────────────────────

/// Opaque identifier assigned by the scheduling engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineHandle(pub i64);

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind tag of an engine registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fires exactly once at an absolute time.
    Scheduled,
    /// Fires repeatedly per a cron expression.
    Periodic,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Periodic => "periodic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "periodic" => Some(Self::Periodic),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the engine hands to the delivery worker when a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub chat_id: ChatId,
    pub message: String,
}

/// Notification that a registered job finished executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub handle: EngineHandle,
    pub kind: JobKind,
}
