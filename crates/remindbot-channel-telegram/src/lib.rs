//! Telegram Bot channel for remindbot.
//!
//! Uses Telegram Bot API with long-polling (no webhook required). The same
//! [`TelegramChannel`] is the inbound [`ChannelPlugin`] and the outbound
//! [`Messenger`].
//!
//! # Configuration
//!
//! ```json5
//! telegram: {
//!     bot_token: "123456:ABC-DEF...",
//! }
//! ```

pub mod api;
pub mod polling;
pub mod types;

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use remindbot_gateway::{ChannelPlugin, ChannelStatus, Messenger};
use remindbot_types::{ChatId, InboundEvent, InlineAction, MessageId};

use api::TelegramApi;
use types::{
    AnswerCallbackQueryParams, BotCommand, EditMessageTextParams, InlineKeyboardMarkup,
    SendMessageParams, SetMyCommandsParams,
};

/// Commands shown in the Telegram menu.
const MENU_COMMANDS: &[(&str, &str)] = &[
    ("start", "Show the help menu"),
    ("newjob", "Create a new reminder job"),
    ("listjobs", "List your active reminder jobs"),
];

/// Telegram channel implementing `ChannelPlugin` and `Messenger`.
pub struct TelegramChannel {
    api: Arc<TelegramApi>,
    state: Mutex<TelegramState>,
}

struct TelegramState {
    status: ChannelStatus,
    cancel: Option<CancellationToken>,
    poll_handle: Option<JoinHandle<()>>,
}

impl TelegramChannel {
    /// Create a new Telegram channel with the given bot token.
    pub fn new(bot_token: &str) -> anyhow::Result<Self> {
        Ok(Self {
            api: Arc::new(TelegramApi::new(bot_token)?),
            state: Mutex::new(TelegramState {
                status: ChannelStatus::Stopped,
                cancel: None,
                poll_handle: None,
            }),
        })
    }
}

#[async_trait]
impl ChannelPlugin for TelegramChannel {
    fn channel_type(&self) -> &str {
        "telegram"
    }

    async fn start(&self, sender: mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.status == ChannelStatus::Running {
            bail!("Telegram channel is already running");
        }

        state.status = ChannelStatus::Starting;

        // Verify bot token
        match self.api.get_me().await {
            Ok(bot) => {
                info!(
                    bot_username = bot.username.as_deref().unwrap_or("unknown"),
                    "Telegram bot authenticated"
                );
            }
            Err(e) => {
                state.status = ChannelStatus::Error(format!("Auth failed: {e}"));
                bail!("Failed to authenticate Telegram bot: {e}");
            }
        }

        let commands = SetMyCommandsParams {
            commands: MENU_COMMANDS
                .iter()
                .map(|(command, description)| BotCommand {
                    command: command.to_string(),
                    description: description.to_string(),
                })
                .collect(),
        };
        if let Err(e) = self.api.set_my_commands(&commands).await {
            warn!("Failed to register bot commands: {e:#}");
        }

        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();
        let api = self.api.clone();

        let handle = tokio::spawn(async move {
            polling::run_polling_loop(&api, sender, cancel_child).await;
        });

        state.cancel = Some(cancel);
        state.poll_handle = Some(handle);
        state.status = ChannelStatus::Running;

        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;

        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }

        if let Some(handle) = state.poll_handle.take() {
            let _ = handle.await;
        }

        state.status = ChannelStatus::Stopped;
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        match self.state.try_lock() {
            Ok(state) => state.status.clone(),
            Err(_) => ChannelStatus::Starting,
        }
    }
}

#[async_trait]
impl Messenger for TelegramChannel {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> anyhow::Result<()> {
        self.api
            .send_message(&SendMessageParams {
                chat_id,
                text: text.to_string(),
                parse_mode: None,
                reply_markup: None,
            })
            .await?;
        Ok(())
    }

    async fn send_rich_text(
        &self,
        chat_id: ChatId,
        text: &str,
        actions: &[InlineAction],
    ) -> anyhow::Result<()> {
        let reply_markup = (!actions.is_empty()).then(|| InlineKeyboardMarkup::from_actions(actions));
        self.api
            .send_message(&SendMessageParams {
                chat_id,
                text: text.to_string(),
                parse_mode: Some("HTML".into()),
                reply_markup,
            })
            .await?;
        Ok(())
    }

    async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> anyhow::Result<()> {
        self.api
            .edit_message_text(&EditMessageTextParams {
                chat_id,
                message_id,
                text: text.to_string(),
                parse_mode: None,
            })
            .await
    }

    async fn acknowledge_callback(&self, callback_id: &str, text: &str) -> anyhow::Result<()> {
        self.api
            .answer_callback_query(&AnswerCallbackQueryParams {
                callback_query_id: callback_id.to_string(),
                text: (!text.is_empty()).then(|| text.to_string()),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_channel_is_stopped() {
        let channel = TelegramChannel::new("123:ABC").unwrap();
        assert_eq!(channel.channel_type(), "telegram");
        assert_eq!(channel.status(), ChannelStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let channel = TelegramChannel::new("123:ABC").unwrap();
        channel.stop().await.unwrap();
        assert_eq!(channel.status(), ChannelStatus::Stopped);
    }

    #[test]
    fn test_menu_commands_are_lowercase() {
        for (command, _) in MENU_COMMANDS {
            assert_eq!(*command, command.to_lowercase());
        }
    }
}
