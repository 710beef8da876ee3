//! Reminder form state machine.
//!
//! Each accepted input appends exactly one field to the chat's draft.
//! Rejected input leaves the stored draft untouched, so the next message is
//! read under the same step.

use std::sync::Arc;

use tracing::{debug, info, warn};

use remindbot_assistant::{Assistant, Negotiation};
use remindbot_cron::{
    Clock, validate_cron, validate_job_message, validate_job_name, validate_schedule_timestamp,
};
use remindbot_storage::ReminderStore;
use remindbot_types::{CallbackData, ChatId, InlineAction};

use crate::draft::Draft;
use crate::error::ReminderError;
use crate::formatting::{MESSAGE_PROMPT, TYPE_PROMPT, confirmation_summary};

/// A message for the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// HTML with buttons.
    Rich {
        text: String,
        actions: Vec<InlineAction>,
    },
}

/// Outcome of feeding free text to the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// The chat has no form in progress.
    NoActiveForm,
    /// The text was taken; show this next.
    Prompt(Reply),
    /// The current step does not take free text.
    Unroutable,
}

pub struct FormMachine {
    store: ReminderStore,
    clock: Arc<dyn Clock>,
    assistant: Option<Arc<Assistant>>,
}

impl FormMachine {
    pub fn new(store: ReminderStore, clock: Arc<dyn Clock>, assistant: Option<Arc<Assistant>>) -> Self {
        Self {
            store,
            clock,
            assistant,
        }
    }

    /// Whether recurring schedules can be negotiated in plain words.
    pub fn is_assisted(&self) -> bool {
        self.assistant.is_some()
    }

    /// Begin (or restart) a form with an empty draft.
    pub async fn start(&self, chat_id: ChatId) -> Result<(), ReminderError> {
        self.store.reset_chat(chat_id).await?;
        if let Some(assistant) = &self.assistant {
            assistant.reset(chat_id).await;
        }
        info!(chat_id, "Reminder form started");
        Ok(())
    }

    /// Feed one free-text message to the chat's form.
    pub async fn advance(&self, chat_id: ChatId, text: &str) -> Result<Advance, ReminderError> {
        let Some(chat) = self.store.get_chat(chat_id).await? else {
            return Ok(Advance::NoActiveForm);
        };
        let Some(draft) = Draft::from_context(&chat.context) else {
            warn!(chat_id, keys = ?chat.context.keys().collect::<Vec<_>>(), "Unrecognised form state");
            return Ok(Advance::Unroutable);
        };
        debug!(chat_id, step = draft.step(), "Advancing form");

        let (next, reply) = match draft {
            Draft::AwaitingName => {
                let name = validate_job_name(text)?;
                (
                    Draft::AwaitingMessage { name },
                    Reply::Text(MESSAGE_PROMPT.to_string()),
                )
            }
            Draft::AwaitingMessage { name } => {
                let message = validate_job_message(text)?;
                (
                    Draft::AwaitingType { name, message },
                    Reply::Rich {
                        text: TYPE_PROMPT.to_string(),
                        actions: vec![
                            InlineAction::new("Once-off", CallbackData::Scheduled),
                            InlineAction::new("Recurring", CallbackData::Periodic),
                        ],
                    },
                )
            }
            Draft::AwaitingSchedule {
                name,
                message,
                recurring,
            } => {
                let schedule = if recurring {
                    match self.recurring_schedule(chat_id, text).await? {
                        Ok(schedule) => schedule,
                        Err(reply) => return Ok(Advance::Prompt(reply)),
                    }
                } else {
                    validate_schedule_timestamp(text, self.clock.now())?
                };
                let summary = confirmation_summary(&name, &message, recurring, &schedule);
                (
                    Draft::AwaitingConfirmation {
                        name,
                        message,
                        recurring,
                        schedule,
                    },
                    Reply::Rich {
                        text: summary,
                        actions: vec![InlineAction::new("Confirm", CallbackData::ConfirmJob)],
                    },
                )
            }
            Draft::AwaitingType { .. } | Draft::AwaitingConfirmation { .. } => {
                return Ok(Advance::Unroutable);
            }
        };

        self.persist(chat_id, &next).await?;
        Ok(Advance::Prompt(reply))
    }

    /// Record the job type chosen with a button.
    pub async fn select_type(&self, chat_id: ChatId, recurring: bool) -> Result<Draft, ReminderError> {
        let chat = self
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| ReminderError::NotFound(format!("job form for chat {chat_id}")))?;

        let Some(Draft::AwaitingType { name, message }) = Draft::from_context(&chat.context) else {
            return Err(ReminderError::WrongStep("the job type has already been chosen"));
        };

        let next = Draft::AwaitingSchedule {
            name,
            message,
            recurring,
        };
        self.persist(chat_id, &next).await?;
        Ok(next)
    }

    /// A typed cron expression, or a negotiation turn when an assistant is set.
    ///
    /// The inner `Err` carries the assistant's reply while it is still negotiating.
    async fn recurring_schedule(
        &self,
        chat_id: ChatId,
        text: &str,
    ) -> Result<Result<String, Reply>, ReminderError> {
        let invalid = match validate_cron(text) {
            Ok(schedule) => return Ok(Ok(schedule.as_str().to_string())),
            Err(e) => e,
        };
        let Some(assistant) = &self.assistant else {
            return Err(invalid.into());
        };

        debug!(chat_id, "Not a cron expression, asking the assistant");
        match assistant.negotiate(chat_id, text).await {
            Ok(Negotiation::Resolved(schedule)) => {
                info!(chat_id, cron = schedule.as_str(), "Schedule negotiated");
                Ok(Ok(schedule.as_str().to_string()))
            }
            Ok(Negotiation::Reply(reply)) => Ok(Err(Reply::Text(reply))),
            Err(e) => {
                warn!(chat_id, "Schedule assistant failed: {e}");
                Err(ReminderError::Degraded(e.to_string()))
            }
        }
    }

    async fn persist(&self, chat_id: ChatId, draft: &Draft) -> Result<(), ReminderError> {
        if !self.store.update_chat_context(chat_id, &draft.to_context()).await? {
            return Err(ReminderError::NotFound(format!("job form for chat {chat_id}")));
        }
        debug!(chat_id, step = draft.step(), "Form advanced");
        Ok(())
    }
}
