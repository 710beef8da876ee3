//! Outbound side of the messaging platform.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use remindbot_cron::JobWorker;
use remindbot_types::{ChatId, InlineAction, JobKind, MessageId, ReminderPayload};

/// Actions the bot can take on the messaging platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send plain text.
    async fn send_text(&self, chat_id: ChatId, text: &str) -> anyhow::Result<()>;

    /// Send HTML text with one button per row.
    async fn send_rich_text(
        &self,
        chat_id: ChatId,
        text: &str,
        actions: &[InlineAction],
    ) -> anyhow::Result<()>;

    /// Replace the text (and buttons) of an earlier message.
    async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> anyhow::Result<()>;

    /// Answer a button press. An empty `text` shows nothing to the user.
    async fn acknowledge_callback(&self, callback_id: &str, text: &str) -> anyhow::Result<()>;
}

/// Delivers fired reminders by sending their message to the owning chat.
pub struct DeliveryWorker {
    messenger: Arc<dyn Messenger>,
}

impl DeliveryWorker {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self { messenger }
    }
}

#[async_trait]
impl JobWorker for DeliveryWorker {
    async fn work(&self, kind: JobKind, payload: &ReminderPayload) -> anyhow::Result<()> {
        tracing::info!(chat_id = payload.chat_id, %kind, "Delivering reminder");
        self.messenger
            .send_text(payload.chat_id, &payload.message)
            .await
            .with_context(|| format!("failed to deliver {kind} reminder to chat {}", payload.chat_id))
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{MockMessenger, Sent};
    use super::*;

    #[tokio::test]
    async fn test_delivery_worker_sends_message() {
        let messenger = Arc::new(MockMessenger::default());
        let worker = DeliveryWorker::new(messenger.clone());

        let payload = ReminderPayload {
            chat_id: 42,
            message: "Pay rent!".into(),
        };
        worker.work(JobKind::Scheduled, &payload).await.unwrap();

        assert_eq!(
            messenger.take().await,
            vec![Sent::Text {
                chat_id: 42,
                text: "Pay rent!".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_delivery_worker_propagates_failure() {
        let messenger = Arc::new(MockMessenger {
            fail_sends: true,
            ..Default::default()
        });
        let worker = DeliveryWorker::new(messenger);
        let payload = ReminderPayload {
            chat_id: 42,
            message: "x".into(),
        };

        let err = worker.work(JobKind::Periodic, &payload).await.unwrap_err();
        assert!(format!("{err:#}").contains("periodic reminder to chat 42"));
    }
}
