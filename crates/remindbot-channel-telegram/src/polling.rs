//! Telegram long-polling loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use remindbot_types::InboundEvent;

use crate::api::{POLL_TIMEOUT_SECS, TelegramApi};
use crate::types::{GetUpdatesParams, Update};

/// Convert an update into an inbound event.
///
/// Returns `None` for updates the bot does not act on: non-text messages and
/// button presses whose message is no longer available.
pub fn update_to_event(update: Update) -> Option<InboundEvent> {
    if let Some(query) = update.callback_query {
        let message = query.message?;
        return Some(InboundEvent::CallbackAction {
            chat_id: message.chat.id,
            message_id: message.message_id,
            callback_id: query.id,
            data: query.data.unwrap_or_default(),
            sender_name: Some(query.from.display_name()),
        });
    }

    let message = update.message?;
    let text = message.text?;
    Some(InboundEvent::TextMessage {
        chat_id: message.chat.id,
        message_id: message.message_id,
        text,
        sender_name: message.from.as_ref().map(|u| u.display_name()),
    })
}

/// Run the long-polling loop, forwarding Telegram updates as `InboundEvent`s.
///
/// Exits when `cancel` is cancelled or the `sender` is closed.
pub async fn run_polling_loop(
    api: &TelegramApi,
    sender: mpsc::Sender<InboundEvent>,
    cancel: CancellationToken,
) {
    let mut offset: Option<i64> = None;
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(30);

    info!("Telegram polling loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let params = GetUpdatesParams {
            offset,
            timeout: Some(POLL_TIMEOUT_SECS),
            allowed_updates: Some(vec!["message".into(), "callback_query".into()]),
        };

        let updates = tokio::select! {
            _ = cancel.cancelled() => break,
            result = api.get_updates(&params) => result,
        };

        match updates {
            Ok(updates) => {
                backoff = Duration::from_secs(1);

                for update in updates {
                    let update_id = update.update_id;
                    offset = Some(update_id + 1);

                    let Some(event) = update_to_event(update) else {
                        debug!(update_id, "Skipping unsupported Telegram update");
                        continue;
                    };

                    debug!(update_id, chat_id = event.chat_id(), "Forwarding Telegram update");

                    if sender.send(event).await.is_err() {
                        info!("Inbound channel closed, stopping polling");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(backoff_secs = backoff.as_secs(), "getUpdates error: {e:#}");

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {},
                }

                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }

    info!("Telegram polling loop stopped");
}
