//! Telegram Bot API HTTP client.

use std::time::Duration;

use anyhow::{Context, bail};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::types::{
    AnswerCallbackQueryParams, ApiResponse, BotInfo, EditMessageTextParams, GetUpdatesParams,
    SendMessageParams, SetMyCommandsParams, TgMessage, Update,
};

/// Long-poll wait requested from `getUpdates`, in seconds.
pub const POLL_TIMEOUT_SECS: i64 = 30;

/// HTTP client for the Telegram Bot API.
pub struct TelegramApi {
    client: Client,
    base_url: String,
}

impl TelegramApi {
    /// Create a new API client with the given bot token.
    pub fn new(bot_token: &str) -> anyhow::Result<Self> {
        // Must outlast the long-poll wait.
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS as u64 + 30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
        })
    }

    /// POST `params` to `method` and unwrap the API envelope.
    async fn call<P, T>(&self, method: &str, params: &P) -> anyhow::Result<Option<T>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp: ApiResponse<T> = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(params)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?
            .json()
            .await
            .with_context(|| format!("{method} response parse failed"))?;

        if !resp.ok {
            bail!(
                "{method} failed: {}",
                resp.description.unwrap_or_else(|| "unknown error".into())
            );
        }
        Ok(resp.result)
    }

    /// Verify the bot token by calling `getMe`.
    pub async fn get_me(&self) -> anyhow::Result<BotInfo> {
        self.call("getMe", &serde_json::json!({}))
            .await?
            .context("getMe returned no result")
    }

    /// Long-poll for updates.
    pub async fn get_updates(&self, params: &GetUpdatesParams) -> anyhow::Result<Vec<Update>> {
        Ok(self.call("getUpdates", params).await?.unwrap_or_default())
    }

    /// Register bot commands in the menu.
    pub async fn set_my_commands(&self, params: &SetMyCommandsParams) -> anyhow::Result<()> {
        self.call::<_, bool>("setMyCommands", params).await?;
        Ok(())
    }

    /// Send a text message.
    pub async fn send_message(&self, params: &SendMessageParams) -> anyhow::Result<TgMessage> {
        self.call("sendMessage", params)
            .await?
            .context("sendMessage returned no result")
    }

    /// Edit an existing message's text. Drops its inline keyboard.
    pub async fn edit_message_text(&self, params: &EditMessageTextParams) -> anyhow::Result<()> {
        // Result is the edited message, or `true` for inline messages.
        self.call::<_, serde_json::Value>("editMessageText", params)
            .await?;
        Ok(())
    }

    /// Answer a callback query so the client stops its loading indicator.
    pub async fn answer_callback_query(
        &self,
        params: &AnswerCallbackQueryParams,
    ) -> anyhow::Result<()> {
        self.call::<_, bool>("answerCallbackQuery", params).await?;
        Ok(())
    }
}
