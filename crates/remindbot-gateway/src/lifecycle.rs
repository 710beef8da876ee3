//! Turning completed forms into scheduled jobs, and tearing them down again.

use std::sync::Arc;

use tracing::{info, warn};

use remindbot_cron::{JobEngine, parse_schedule_timestamp, validate_cron};
use remindbot_storage::{JobRecord, NewJob, ReminderStore, chats, jobs};
use remindbot_types::{ChatId, EngineHandle, ReminderPayload};

use crate::draft::Draft;
use crate::error::ReminderError;

/// Parsed schedule of a confirmed form.
enum Plan {
    Once(chrono::DateTime<chrono::Utc>),
    Periodic(remindbot_cron::CronSchedule),
}

pub struct JobLifecycle {
    store: ReminderStore,
    engine: Arc<dyn JobEngine>,
}

impl JobLifecycle {
    pub fn new(store: ReminderStore, engine: Arc<dyn JobEngine>) -> Self {
        Self { store, engine }
    }

    /// Schedule the chat's completed form and consume it.
    ///
    /// Once-off registration, the job insert and the form tombstone commit
    /// together. A periodic registration happens first and is removed again if
    /// the transaction fails.
    pub async fn confirm(&self, chat_id: ChatId) -> Result<JobRecord, ReminderError> {
        let chat = self
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| ReminderError::NotFound(format!("job form for chat {chat_id}")))?;

        let Some(Draft::AwaitingConfirmation {
            name,
            message,
            recurring,
            schedule,
        }) = Draft::from_context(&chat.context)
        else {
            return Err(ReminderError::IncompleteForm);
        };

        let plan = if recurring {
            Plan::Periodic(validate_cron(&schedule)?)
        } else {
            Plan::Once(parse_schedule_timestamp(&schedule)?)
        };

        let payload = ReminderPayload {
            chat_id,
            message: message.clone(),
        };
        let periodic_handle = match &plan {
            Plan::Periodic(cron) => Some(self.engine.register_periodic(payload.clone(), cron.clone())?),
            Plan::Once(_) => None,
        };

        let engine = self.engine.clone();
        let result = self
            .store
            .database()
            .call(move |conn| -> Result<JobRecord, ReminderError> {
                let tx = conn.transaction()?;
                let engine_handle = match (plan, periodic_handle) {
                    (Plan::Once(fire_at), _) => engine.register_once(&tx, &payload, fire_at)?,
                    (Plan::Periodic(_), Some(handle)) => handle,
                    (Plan::Periodic(_), None) => return Err(ReminderError::IncompleteForm),
                };
                let job = jobs::insert(
                    &tx,
                    &NewJob {
                        chat_id,
                        is_recurring: recurring,
                        message,
                        schedule,
                        name,
                        engine_handle,
                    },
                )?;
                if !chats::consume(&tx, chat_id)? {
                    return Err(ReminderError::NotFound(format!("job form for chat {chat_id}")));
                }
                tx.commit()?;
                Ok(job)
            })
            .await;

        match result {
            Ok(job) => {
                info!(
                    chat_id,
                    job_id = job.id,
                    handle = ?job.engine_handle,
                    recurring = job.is_recurring,
                    "Job scheduled"
                );
                Ok(job)
            }
            Err(e) => {
                if let Some(handle) = periodic_handle {
                    self.engine.remove_periodic(handle);
                    warn!(chat_id, %handle, "Removed periodic registration after failed confirm: {e}");
                }
                Err(e)
            }
        }
    }

    /// Cancel a job owned by `chat_id`.
    ///
    /// The engine registration goes first so a failed cancel leaves the row in
    /// place for a retry.
    pub async fn cancel(&self, chat_id: ChatId, job_id: i64) -> Result<JobRecord, ReminderError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ReminderError::NotFound(format!("job {job_id}")))?;
        if job.chat_id != chat_id {
            warn!(chat_id, job_id, owner = job.chat_id, "Refused to cancel another chat's job");
            return Err(ReminderError::PermissionDenied);
        }

        match (job.is_recurring, job.engine_handle) {
            (true, Some(handle)) => {
                if !self.engine.remove_periodic(handle) {
                    warn!(job_id, %handle, "Periodic registration was already gone");
                }
            }
            (false, Some(handle)) => self.engine.cancel_once(handle).await?,
            (_, None) => warn!(job_id, "Job has no engine handle, deleting row only"),
        }

        self.store.soft_delete_job(job_id).await?;
        info!(chat_id, job_id, "Job cancelled");
        Ok(job)
    }

    /// Re-register every live recurring job with the engine.
    ///
    /// Periodic registrations live in engine memory, so this runs once at
    /// startup. Handles are rewritten in a single transaction; on failure all
    /// registrations made here are removed again.
    pub async fn restore_periodic_jobs(&self) -> Result<usize, ReminderError> {
        let engine = self.engine.clone();
        let registered = Arc::new(std::sync::Mutex::new(Vec::<EngineHandle>::new()));
        let tracked = registered.clone();

        let result = self
            .store
            .database()
            .call(move |conn| -> Result<usize, ReminderError> {
                let tx = conn.transaction()?;
                jobs::clear_recurring_handles(&tx)?;

                let mut restored = 0;
                for job in jobs::list_live_recurring(&tx)? {
                    let schedule = match validate_cron(&job.schedule) {
                        Ok(schedule) => schedule,
                        Err(e) => {
                            warn!(job_id = job.id, schedule = %job.schedule, "Skipping recurring job: {e}");
                            continue;
                        }
                    };
                    let payload = ReminderPayload {
                        chat_id: job.chat_id,
                        message: job.message.clone(),
                    };
                    let handle = engine.register_periodic(payload, schedule)?;
                    tracked.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
                    jobs::set_engine_handle(&tx, job.id, handle)?;
                    restored += 1;
                }

                tx.commit()?;
                Ok(restored)
            })
            .await;

        match result {
            Ok(restored) => {
                info!(count = restored, "Recurring jobs restored");
                Ok(restored)
            }
            Err(e) => {
                let handles = std::mem::take(&mut *registered.lock().unwrap_or_else(|e| e.into_inner()));
                for handle in handles {
                    self.engine.remove_periodic(handle);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use remindbot_cron::{FixedClock, LocalEngine, RunState, ValidationError};
    use remindbot_storage::{ChatContext, Database};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    struct Fixture {
        store: ReminderStore,
        engine: Arc<LocalEngine>,
        lifecycle: JobLifecycle,
    }

    async fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let engine = Arc::new(
            LocalEngine::open(db.clone(), Arc::new(FixedClock::new(now())))
                .await
                .unwrap(),
        );
        let store = ReminderStore::new(db);
        let lifecycle = JobLifecycle::new(store.clone(), engine.clone());
        Fixture {
            store,
            engine,
            lifecycle,
        }
    }

    async fn fill_form(store: &ReminderStore, chat_id: ChatId, recurring: bool, schedule: &str) {
        store.reset_chat(chat_id).await.unwrap();
        let ctx: ChatContext = [
            ("name", "Pay rent"),
            ("message", "Pay rent!"),
            ("is_recurring", if recurring { "true" } else { "false" }),
            ("schedule", schedule),
        ]
        .into_iter()
        .collect();
        store.update_chat_context(chat_id, &ctx).await.unwrap();
    }

    async fn run_count(db: &Database) -> i64 {
        db.call(|conn| -> remindbot_storage::Result<i64> {
            Ok(conn.query_row("SELECT COUNT(*) FROM engine_runs", [], |r| r.get(0))?)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_confirm_once_off() {
        let f = fixture().await;
        fill_form(&f.store, 42, false, "2099-01-01 00:00:00").await;

        let job = f.lifecycle.confirm(42).await.unwrap();
        let handle = job.engine_handle.expect("handle set");
        assert!(!job.is_recurring);
        assert_eq!(job.name, "Pay rent");

        assert_eq!(f.store.list_active_jobs(42).await.unwrap(), vec![job]);
        assert_eq!(f.engine.once_state(handle).await.unwrap(), Some(RunState::Available));
        assert_eq!(f.engine.periodic_count(), 0);
        // Form consumed.
        assert!(f.store.get_chat(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirm_recurring() {
        let f = fixture().await;
        fill_form(&f.store, 42, true, "0 9 * * 1-5").await;

        let job = f.lifecycle.confirm(42).await.unwrap();
        assert!(job.is_recurring);
        assert!(job.engine_handle.is_some());
        assert_eq!(f.engine.periodic_count(), 1);
        assert_eq!(run_count(f.store.database()).await, 0);
    }

    #[tokio::test]
    async fn test_confirm_twice_is_not_found() {
        let f = fixture().await;
        fill_form(&f.store, 42, false, "2099-01-01 00:00:00").await;

        f.lifecycle.confirm(42).await.unwrap();
        assert!(matches!(
            f.lifecycle.confirm(42).await,
            Err(ReminderError::NotFound(_))
        ));
        assert_eq!(f.store.list_active_jobs(42).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_incomplete_form() {
        let f = fixture().await;
        f.store.reset_chat(42).await.unwrap();
        let ctx: ChatContext = [("name", "x"), ("message", "y")].into_iter().collect();
        f.store.update_chat_context(42, &ctx).await.unwrap();

        assert!(matches!(
            f.lifecycle.confirm(42).await,
            Err(ReminderError::IncompleteForm)
        ));
        assert!(f.store.get_chat(42).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalid_cron_fails_before_engine() {
        let f = fixture().await;
        fill_form(&f.store, 42, true, "61 * * * *").await;

        let err = f.lifecycle.confirm(42).await.unwrap_err();
        assert!(matches!(err, ReminderError::Validation(ValidationError::Cron(_))));
        assert_eq!(f.engine.periodic_count(), 0);
        assert!(f.store.list_active_jobs(42).await.unwrap().is_empty());

        // Corrected form confirms exactly once.
        fill_form(&f.store, 42, true, "1 * * * *").await;
        f.lifecycle.confirm(42).await.unwrap();
        assert!(f.lifecycle.confirm(42).await.is_err());
        assert_eq!(f.store.list_active_jobs(42).await.unwrap().len(), 1);
        assert_eq!(f.engine.periodic_count(), 1);
    }

    #[tokio::test]
    async fn test_cron_stored_unmodified() {
        let f = fixture().await;
        let form = crate::form::FormMachine::new(
            f.store.clone(),
            Arc::new(FixedClock::new(now())),
            None,
        );
        form.start(42).await.unwrap();
        form.advance(42, "Standup").await.unwrap();
        form.advance(42, "Standup!").await.unwrap();
        form.select_type(42, true).await.unwrap();
        form.advance(42, " */15 9-17 ? * mon-FRI ").await.unwrap();

        let job = f.lifecycle.confirm(42).await.unwrap();
        assert_eq!(job.schedule, "*/15 9-17 ? * mon-FRI");
        let stored = f.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(validate_cron(&stored.schedule).unwrap().as_str(), stored.schedule);
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_once_off() {
        let f = fixture().await;
        fill_form(&f.store, 42, false, "2099-01-01 00:00:00").await;
        break_job_inserts(f.store.database()).await;

        assert!(matches!(
            f.lifecycle.confirm(42).await,
            Err(ReminderError::Storage(_))
        ));
        assert_eq!(run_count(f.store.database()).await, 0);
        assert!(f.store.get_chat(42).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_insert_removes_periodic_registration() {
        let f = fixture().await;
        fill_form(&f.store, 42, true, "0 9 * * *").await;
        break_job_inserts(f.store.database()).await;

        assert!(f.lifecycle.confirm(42).await.is_err());
        assert_eq!(f.engine.periodic_count(), 0);
        assert_eq!(f.store.get_chat(42).await.unwrap().unwrap().context.len(), 4);
    }

    async fn break_job_inserts(db: &Database) {
        db.call(|conn| -> remindbot_storage::Result<()> {
            conn.execute_batch(
                "CREATE TRIGGER reject_jobs BEFORE INSERT ON jobs
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )?;
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_once_off() {
        let f = fixture().await;
        fill_form(&f.store, 42, false, "2099-01-01 00:00:00").await;
        let job = f.lifecycle.confirm(42).await.unwrap();
        let handle = job.engine_handle.unwrap();

        let cancelled = f.lifecycle.cancel(42, job.id).await.unwrap();
        assert_eq!(cancelled.name, "Pay rent");
        assert_eq!(f.engine.once_state(handle).await.unwrap(), Some(RunState::Cancelled));
        assert!(f.store.get_job(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_recurring() {
        let f = fixture().await;
        fill_form(&f.store, 42, true, "*/5 * * * *").await;
        let job = f.lifecycle.confirm(42).await.unwrap();

        f.lifecycle.cancel(42, job.id).await.unwrap();
        assert_eq!(f.engine.periodic_count(), 0);
        assert!(f.store.list_active_jobs(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_other_chats_job() {
        let f = fixture().await;
        fill_form(&f.store, 42, true, "0 9 * * *").await;
        let job = f.lifecycle.confirm(42).await.unwrap();
        f.store.reset_chat(7).await.unwrap();

        assert!(matches!(
            f.lifecycle.cancel(7, job.id).await,
            Err(ReminderError::PermissionDenied)
        ));
        assert_eq!(f.store.get_job(job.id).await.unwrap(), Some(job));
        assert_eq!(f.engine.periodic_count(), 1);
        assert!(f.store.get_chat(7).await.unwrap().unwrap().context.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let f = fixture().await;
        assert!(matches!(
            f.lifecycle.cancel(42, 999).await,
            Err(ReminderError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_periodic_jobs() {
        let f = fixture().await;
        fill_form(&f.store, 42, true, "0 9 * * *").await;
        let first = f.lifecycle.confirm(42).await.unwrap();
        fill_form(&f.store, 7, true, "30 18 * * 5").await;
        f.lifecycle.confirm(7).await.unwrap();
        fill_form(&f.store, 7, false, "2099-01-01 00:00:00").await;
        f.lifecycle.confirm(7).await.unwrap();

        // A fresh process: same database, empty engine memory.
        let engine = Arc::new(
            LocalEngine::open(f.store.database().clone(), Arc::new(FixedClock::new(now())))
                .await
                .unwrap(),
        );
        let lifecycle = JobLifecycle::new(f.store.clone(), engine.clone());

        assert_eq!(lifecycle.restore_periodic_jobs().await.unwrap(), 2);
        assert_eq!(engine.periodic_count(), 2);

        let restored = f.store.get_job(first.id).await.unwrap().unwrap();
        assert!(restored.engine_handle.is_some());
        lifecycle.cancel(42, first.id).await.unwrap();
        assert_eq!(engine.periodic_count(), 1);
    }
}
