//! `remindbot run`: wire storage, engine, bot and Telegram together.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use remindbot_assistant::Assistant;
use remindbot_channel_telegram::TelegramChannel;
use remindbot_config::RemindBotConfig;
use remindbot_cron::{Clock, JobEngine, LocalEngine, SystemClock};
use remindbot_gateway::{
    ChannelPlugin, CompletionReactor, DeliveryWorker, ReminderBot, run_dispatch_loop,
};
use remindbot_storage::{Database, ReminderStore};

const INBOUND_CAPACITY: usize = 256;

pub async fn run_bot(config: RemindBotConfig) -> anyhow::Result<()> {
    let bot_token = config.bot_token()?;

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = Database::open(&db_path).context("failed to open database")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(
        LocalEngine::open(db.clone(), clock.clone())
            .await
            .context("failed to start scheduling engine")?,
    );
    let store = ReminderStore::new(db);

    let assistant = config
        .assistant()
        .map(|assistant| Arc::new(Assistant::from_config(assistant)));
    info!(
        env = %config.env,
        assisted = assistant.is_some(),
        "Starting remindbot"
    );

    let telegram = Arc::new(TelegramChannel::new(bot_token)?);
    let bot = Arc::new(ReminderBot::new(
        telegram.clone(),
        store.clone(),
        engine.clone(),
        clock,
        assistant,
    ));

    bot.lifecycle()
        .restore_periodic_jobs()
        .await
        .context("failed to restore recurring jobs")?;

    let cancel = CancellationToken::new();

    // Subscribe before the engine can fire anything.
    let reactor = CompletionReactor::new(store).spawn(engine.subscribe(), cancel.clone());
    let engine_task = tokio::spawn(engine.clone().run(
        Arc::new(DeliveryWorker::new(telegram.clone())),
        Duration::from_millis(config.engine.poll_interval_ms),
        cancel.clone(),
    ));

    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
    if let Err(e) = telegram.start(tx).await {
        cancel.cancel();
        let _ = tokio::join!(reactor, engine_task);
        return Err(e.context("failed to start Telegram channel"));
    }

    let dispatch = tokio::spawn(run_dispatch_loop(
        bot,
        rx,
        Duration::from_secs(config.dispatch.event_timeout_secs),
        cancel.clone(),
    ));

    info!("remindbot is running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C, shutting down: {e}");
    }

    info!("Shutting down");
    cancel.cancel();
    if let Err(e) = telegram.stop().await {
        warn!("Failed to stop Telegram channel: {e:#}");
    }

    let shutdown_timeout = Duration::from_secs(config.dispatch.shutdown_timeout_secs);
    let joined = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(dispatch, engine_task, reactor);
    })
    .await;
    if joined.is_err() {
        warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Background tasks did not stop in time"
        );
    }

    info!("remindbot stopped");
    Ok(())
}
