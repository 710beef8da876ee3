//! The single inbound dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use remindbot_types::InboundEvent;

use crate::handlers::ReminderBot;

/// Handle inbound events one at a time until the stream ends or `cancel` fires.
///
/// Each event runs in its own task under `event_timeout`, so a panic or a
/// stuck handler only costs that event. The chat is told when its event is
/// dropped. `event_timeout` should exceed the assistant's completion
/// deadline so a slow assistant degrades instead of timing out.
pub async fn run_dispatch_loop(
    bot: Arc<ReminderBot>,
    mut events: mpsc::Receiver<InboundEvent>,
    event_timeout: Duration,
    cancel: CancellationToken,
) {
    info!(timeout_secs = event_timeout.as_secs(), "Dispatch loop started");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let chat_id = event.chat_id();
        let handler = bot.clone();
        let mut task = tokio::spawn(async move { handler.handle_event(event).await });

        match tokio::time::timeout(event_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(chat_id, "Failed to reply to event: {e:#}"),
            Ok(Err(e)) => {
                error!(chat_id, "Event handler crashed: {e}");
                bot.report_unhandled(chat_id).await;
            }
            Err(_) => {
                task.abort();
                warn!(chat_id, timeout_secs = event_timeout.as_secs(), "Event handling timed out");
                bot.report_unhandled(chat_id).await;
            }
        }
    }

    info!("Dispatch loop stopped");
}
