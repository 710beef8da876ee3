//! Inbound event handlers.

use std::sync::Arc;

use tracing::{error, info, warn};

use remindbot_assistant::Assistant;
use remindbot_cron::{Clock, JobEngine};
use remindbot_storage::ReminderStore;
use remindbot_types::{CallbackData, ChatId, InboundEvent, MessageId};

use crate::error::ReminderError;
use crate::form::{Advance, FormMachine, Reply};
use crate::formatting::{
    NAME_PROMPT, Origin, START_TEXT, UNHANDLED_TEXT, UNKNOWN_COMMAND_TEXT, UNKNOWN_QUERY_TEXT,
    UNTRACEABLE_TEXT, cancelled_text, error_text, job_list, schedule_prompt, scheduled_text,
};
use crate::lifecycle::JobLifecycle;
use crate::messenger::Messenger;

/// Bot commands understood by [`ReminderBot`].
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Start,
    NewJob,
    ListJobs,
    /// Raw job id argument, possibly empty.
    CancelJob(&'a str),
    Unknown(&'a str),
}

/// Parse `/command[@bot] [args]`. `None` if `text` is not a command.
fn parse_command(text: &str) -> Option<Command<'_>> {
    let rest = text.trim().strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head);

    let command = match name {
        "start" => Command::Start,
        "newjob" => Command::NewJob,
        "listjobs" => Command::ListJobs,
        "canceljob" => Command::CancelJob(args),
        _ => match name.strip_prefix("canceljob-") {
            Some(id) => Command::CancelJob(id),
            None => Command::Unknown(name),
        },
    };
    Some(command)
}

/// Routes inbound events to the form, the job lifecycle and the messenger.
pub struct ReminderBot {
    messenger: Arc<dyn Messenger>,
    store: ReminderStore,
    form: FormMachine,
    lifecycle: JobLifecycle,
}

impl ReminderBot {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        store: ReminderStore,
        engine: Arc<dyn JobEngine>,
        clock: Arc<dyn Clock>,
        assistant: Option<Arc<Assistant>>,
    ) -> Self {
        Self {
            messenger,
            form: FormMachine::new(store.clone(), clock, assistant),
            lifecycle: JobLifecycle::new(store.clone(), engine),
            store,
        }
    }

    pub fn lifecycle(&self) -> &JobLifecycle {
        &self.lifecycle
    }

    /// Handle one inbound event.
    ///
    /// Operation failures are reported to the chat. The returned error only
    /// covers failures to talk to the messaging platform.
    pub async fn handle_event(&self, event: InboundEvent) -> anyhow::Result<()> {
        match event {
            InboundEvent::TextMessage {
                chat_id,
                text,
                sender_name,
                ..
            } => {
                let sender = sender_name.as_deref().unwrap_or("unknown");
                match parse_command(&text) {
                    Some(command) => {
                        info!(chat_id, sender, ?command, "Received command");
                        self.handle_command(chat_id, command).await
                    }
                    None => {
                        info!(chat_id, sender, "Received message");
                        self.handle_message(chat_id, &text).await
                    }
                }
            }
            InboundEvent::CallbackAction {
                chat_id,
                message_id,
                callback_id,
                data,
                sender_name,
            } => {
                info!(
                    chat_id,
                    sender = sender_name.as_deref().unwrap_or("unknown"),
                    data = %data,
                    "Received callback query"
                );
                self.handle_callback(chat_id, message_id, &callback_id, &data)
                    .await
            }
        }
    }

    // ──────────────────── Commands ────────────────────

    async fn handle_command(&self, chat_id: ChatId, command: Command<'_>) -> anyhow::Result<()> {
        let result = match command {
            Command::Start => return self.messenger.send_text(chat_id, START_TEXT).await,
            Command::NewJob => self
                .form
                .start(chat_id)
                .await
                .map(|()| NAME_PROMPT.to_string()),
            Command::ListJobs => self
                .store
                .list_active_jobs(chat_id)
                .await
                .map(|jobs| job_list(&jobs))
                .map_err(ReminderError::from),
            Command::CancelJob(raw_id) => self.cancel_job(chat_id, raw_id).await,
            Command::Unknown(name) => {
                warn!(chat_id, command = name, "Unknown command");
                return self.messenger.send_text(chat_id, UNKNOWN_COMMAND_TEXT).await;
            }
        };

        match result {
            Ok(text) => self.messenger.send_text(chat_id, &text).await,
            Err(e) => self.report(chat_id, Origin::Command, &e).await,
        }
    }

    async fn cancel_job(&self, chat_id: ChatId, raw_id: &str) -> Result<String, ReminderError> {
        if raw_id.is_empty() {
            return Err(ReminderError::InvalidArgument("please provide a valid job ID"));
        }
        let job_id: i64 = raw_id
            .parse()
            .map_err(|_| ReminderError::InvalidArgument("please provide a valid numeric job ID"))?;

        let job = self.lifecycle.cancel(chat_id, job_id).await?;
        Ok(cancelled_text(&job.name))
    }

    // ──────────────────── Free text ────────────────────

    async fn handle_message(&self, chat_id: ChatId, text: &str) -> anyhow::Result<()> {
        match self.form.advance(chat_id, text).await {
            Ok(Advance::Prompt(reply)) => self.send_reply(chat_id, reply).await,
            Ok(Advance::NoActiveForm | Advance::Unroutable) => {
                self.messenger.send_text(chat_id, UNTRACEABLE_TEXT).await
            }
            Err(e) => self.report(chat_id, Origin::Message, &e).await,
        }
    }

    // ──────────────────── Callback queries ────────────────────

    async fn handle_callback(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        callback_id: &str,
        data: &str,
    ) -> anyhow::Result<()> {
        if let Err(e) = self.messenger.acknowledge_callback(callback_id, "").await {
            warn!(chat_id, callback_id, "Failed to acknowledge callback: {e:#}");
        }

        let result = match CallbackData::parse(data) {
            Some(CallbackData::Scheduled) => self.choose_type(chat_id, false).await,
            Some(CallbackData::Periodic) => self.choose_type(chat_id, true).await,
            Some(CallbackData::ConfirmJob) => self
                .lifecycle
                .confirm(chat_id)
                .await
                .map(|job| scheduled_text(&job.name)),
            None => {
                warn!(chat_id, data, "Unknown callback data");
                return self.messenger.send_text(chat_id, UNKNOWN_QUERY_TEXT).await;
            }
        };

        match result {
            Ok(text) => self.messenger.edit_text(chat_id, message_id, &text).await,
            Err(e) => self.report(chat_id, Origin::CallbackQuery, &e).await,
        }
    }

    async fn choose_type(&self, chat_id: ChatId, recurring: bool) -> Result<String, ReminderError> {
        self.form.select_type(chat_id, recurring).await?;
        Ok(schedule_prompt(recurring, self.form.is_assisted()))
    }

    // ──────────────────── Replies ────────────────────

    async fn send_reply(&self, chat_id: ChatId, reply: Reply) -> anyhow::Result<()> {
        match reply {
            Reply::Text(text) => self.messenger.send_text(chat_id, &text).await,
            Reply::Rich { text, actions } => {
                self.messenger
                    .send_rich_text(chat_id, &text, &actions)
                    .await
            }
        }
    }

    /// Tell the chat its last event was dropped. Best effort.
    pub async fn report_unhandled(&self, chat_id: ChatId) {
        if let Err(e) = self.messenger.send_text(chat_id, UNHANDLED_TEXT).await {
            warn!(chat_id, "Failed to report dropped event: {e:#}");
        }
    }

    async fn report(&self, chat_id: ChatId, origin: Origin, e: &ReminderError) -> anyhow::Result<()> {
        if e.is_validation() {
            info!(chat_id, ?origin, "Rejected input: {e}");
        } else {
            error!(chat_id, ?origin, "Operation failed: {e}");
        }
        self.messenger
            .send_text(chat_id, &error_text(origin, e))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use remindbot_cron::{FixedClock, LocalEngine};
    use remindbot_storage::Database;

    use crate::formatting::{MESSAGE_PROMPT, NO_JOBS_TEXT, ONCE_OFF_PROMPT, RECURRING_PROMPT, TYPE_PROMPT};
    use crate::messenger::mock::{MockMessenger, Sent};

    struct Harness {
        bot: ReminderBot,
        messenger: Arc<MockMessenger>,
        engine: Arc<LocalEngine>,
        store: ReminderStore,
    }

    async fn harness() -> Harness {
        let now = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let db = Database::open_in_memory().unwrap();
        let clock = Arc::new(FixedClock::new(now));
        let engine = Arc::new(LocalEngine::open(db.clone(), clock.clone()).await.unwrap());
        let store = ReminderStore::new(db);
        let messenger = Arc::new(MockMessenger::default());
        let bot = ReminderBot::new(messenger.clone(), store.clone(), engine.clone(), clock, None);
        Harness {
            bot,
            messenger,
            engine,
            store,
        }
    }

    fn text(chat_id: ChatId, text: &str) -> InboundEvent {
        InboundEvent::TextMessage {
            chat_id,
            message_id: 1,
            text: text.into(),
            sender_name: Some("alice".into()),
        }
    }

    fn press(chat_id: ChatId, message_id: MessageId, data: CallbackData) -> InboundEvent {
        InboundEvent::CallbackAction {
            chat_id,
            message_id,
            callback_id: format!("cb-{message_id}"),
            data: data.as_str().into(),
            sender_name: None,
        }
    }

    impl Harness {
        async fn send(&self, event: InboundEvent) -> Vec<Sent> {
            self.bot.handle_event(event).await.unwrap();
            self.messenger.take().await
        }

        async fn last_text(&self, event: InboundEvent) -> String {
            self.bot.handle_event(event).await.unwrap();
            let texts = self.messenger.texts().await;
            self.messenger.take().await;
            texts.last().cloned().unwrap_or_default()
        }

        /// Walk a chat up to the confirmation step.
        async fn fill(&self, chat_id: ChatId, recurring: bool, schedule: &str) {
            self.send(text(chat_id, "/newjob")).await;
            self.send(text(chat_id, "Pay rent")).await;
            self.send(text(chat_id, "Pay rent!")).await;
            let data = if recurring {
                CallbackData::Periodic
            } else {
                CallbackData::Scheduled
            };
            self.send(press(chat_id, 10, data)).await;
            self.send(text(chat_id, schedule)).await;
        }
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command("/newjob@RemindBot"), Some(Command::NewJob));
        assert_eq!(parse_command("/canceljob-12"), Some(Command::CancelJob("12")));
        assert_eq!(parse_command("/canceljob  12 "), Some(Command::CancelJob("12")));
        assert_eq!(parse_command("/canceljob"), Some(Command::CancelJob("")));
        assert_eq!(parse_command("/help me"), Some(Command::Unknown("help")));
        assert_eq!(parse_command("hello /start"), None);
    }

    #[tokio::test]
    async fn test_start_shows_help() {
        let h = harness().await;
        assert_eq!(h.last_text(text(42, "/start")).await, START_TEXT);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let h = harness().await;
        assert_eq!(h.last_text(text(42, "/frobnicate")).await, UNKNOWN_COMMAND_TEXT);
    }

    #[tokio::test]
    async fn test_text_without_form() {
        let h = harness().await;
        assert_eq!(h.last_text(text(42, "remind me")).await, UNTRACEABLE_TEXT);
    }

    #[tokio::test]
    async fn test_full_once_off_conversation() {
        let h = harness().await;

        assert_eq!(h.last_text(text(42, "/newjob")).await, NAME_PROMPT);
        assert_eq!(h.last_text(text(42, "Pay rent")).await, MESSAGE_PROMPT);

        let sent = h.send(text(42, "Pay rent!")).await;
        match &sent[..] {
            [Sent::Rich { text, actions, .. }] => {
                assert_eq!(text, TYPE_PROMPT);
                assert_eq!(actions.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }

        let sent = h.send(press(42, 10, CallbackData::Scheduled)).await;
        assert_eq!(
            sent,
            vec![
                Sent::Ack {
                    callback_id: "cb-10".into()
                },
                Sent::Edit {
                    chat_id: 42,
                    message_id: 10,
                    text: ONCE_OFF_PROMPT.into()
                },
            ]
        );

        let sent = h.send(text(42, "2099-01-01 00:00:00")).await;
        assert!(matches!(&sent[..], [Sent::Rich { actions, .. }] if actions[0].data == "confirm-job"));

        let sent = h.send(press(42, 11, CallbackData::ConfirmJob)).await;
        assert_eq!(
            sent[1],
            Sent::Edit {
                chat_id: 42,
                message_id: 11,
                text: "Successfully scheduled job Pay rent".into()
            }
        );

        let jobs = h.store.list_active_jobs(42).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(h.engine.periodic_count(), 0);

        // The form is consumed.
        let again = h.last_text(press(42, 11, CallbackData::ConfirmJob)).await;
        assert!(again.starts_with("An error occurred processing the callback query:"));
        assert_eq!(h.last_text(text(42, "more")).await, UNTRACEABLE_TEXT);
    }

    #[tokio::test]
    async fn test_recurring_selection_prompt() {
        let h = harness().await;
        h.send(text(42, "/newjob")).await;
        h.send(text(42, "Standup")).await;
        h.send(text(42, "Standup!")).await;

        assert_eq!(h.last_text(press(42, 5, CallbackData::Periodic)).await, RECURRING_PROMPT);
        // A second press is out of step and changes nothing.
        let again = h.last_text(press(42, 5, CallbackData::Scheduled)).await;
        assert!(again.starts_with("An error occurred processing the callback query:"));
        let ctx = h.store.get_chat(42).await.unwrap().unwrap().context;
        assert_eq!(ctx.get("is_recurring"), Some("true"));
    }

    #[tokio::test]
    async fn test_validation_error_reported() {
        let h = harness().await;
        h.send(text(42, "/newjob")).await;
        let reply = h.last_text(text(42, "   ")).await;
        assert!(reply.starts_with("An error occurred processing the message:"));
        assert!(h.store.get_chat(42).await.unwrap().unwrap().context.is_empty());
    }

    #[tokio::test]
    async fn test_list_and_cancel_jobs() {
        let h = harness().await;
        assert_eq!(h.last_text(text(42, "/listjobs")).await, NO_JOBS_TEXT);

        h.fill(42, true, "0 9 * * 1-5").await;
        h.send(press(42, 11, CallbackData::ConfirmJob)).await;
        let job = h.store.list_active_jobs(42).await.unwrap().remove(0);

        let listing = h.last_text(text(42, "/listjobs")).await;
        assert!(listing.contains(&format!("Job ID: {}", job.id)));
        assert!(listing.contains("At 09:00, Monday through Friday"));

        let denied = h.last_text(text(7, &format!("/canceljob-{}", job.id))).await;
        assert_eq!(
            denied,
            "An error occurred processing the command: you can only cancel your own jobs"
        );
        assert_eq!(h.engine.periodic_count(), 1);

        let done = h.last_text(text(42, &format!("/canceljob {}", job.id))).await;
        assert_eq!(done, "Successfully cancelled job: Pay rent");
        assert_eq!(h.engine.periodic_count(), 0);
        assert_eq!(h.last_text(text(42, "/listjobs")).await, NO_JOBS_TEXT);
    }

    #[tokio::test]
    async fn test_cancel_bad_id() {
        let h = harness().await;
        assert_eq!(
            h.last_text(text(42, "/canceljob-abc")).await,
            "An error occurred processing the command: please provide a valid numeric job ID"
        );
        assert_eq!(
            h.last_text(text(42, "/canceljob-")).await,
            "An error occurred processing the command: please provide a valid job ID"
        );

        let err = h.bot.cancel_job(42, "abc").await.unwrap_err();
        assert!(matches!(err, ReminderError::InvalidArgument(_)));
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_unknown_callback_data_is_acknowledged() {
        let h = harness().await;
        let sent = h
            .send(InboundEvent::CallbackAction {
                chat_id: 42,
                message_id: 3,
                callback_id: "cb-x".into(),
                data: "bogus".into(),
                sender_name: None,
            })
            .await;
        assert_eq!(
            sent,
            vec![
                Sent::Ack {
                    callback_id: "cb-x".into()
                },
                Sent::Text {
                    chat_id: 42,
                    text: UNKNOWN_QUERY_TEXT.into()
                },
            ]
        );
    }
}
