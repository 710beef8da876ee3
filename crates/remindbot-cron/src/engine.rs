//! Local scheduling engine.
//!
//! Once-off runs are queued in `engine_runs` through the caller's connection,
//! so a registration commits or rolls back with the caller's transaction.
//! Periodic registrations are process-global and held in memory; callers
//! re-register them on startup. A tick loop delivers due work through a
//! [`JobWorker`] and publishes a [`CompletionEvent`] for every success.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use remindbot_storage::{Database, StorageError};
use remindbot_types::{CompletionEvent, EngineHandle, JobKind, ReminderPayload};

use crate::expr::CronSchedule;
use crate::store::{self, RunState};
use crate::validate::Clock;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("no engine registration with handle {0}")]
    NotFound(EngineHandle),
    #[error("schedule '{0}' has no future fire time")]
    NeverFires(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Sqlite(e))
    }
}

/// The operations the reminder core needs from a scheduling engine.
#[async_trait]
pub trait JobEngine: Send + Sync {
    /// Queue a once-off job. Pass the open transaction as `conn` so the
    /// registration commits or rolls back with it.
    fn register_once(
        &self,
        conn: &Connection,
        payload: &ReminderPayload,
        fire_at: DateTime<Utc>,
    ) -> Result<EngineHandle, EngineError>;

    /// Cancel a queued once-off job. Runs that already finished are left alone.
    async fn cancel_once(&self, handle: EngineHandle) -> Result<(), EngineError>;

    /// Register a recurring job. Not transactional.
    fn register_periodic(
        &self,
        payload: ReminderPayload,
        schedule: CronSchedule,
    ) -> Result<EngineHandle, EngineError>;

    /// Drop a recurring job. Returns false if the handle was unknown.
    fn remove_periodic(&self, handle: EngineHandle) -> bool;

    /// Subscribe to completion events.
    fn subscribe(&self) -> broadcast::Receiver<CompletionEvent>;
}

/// Executes a fired job.
#[async_trait]
pub trait JobWorker: Send + Sync {
    async fn work(&self, kind: JobKind, payload: &ReminderPayload) -> anyhow::Result<()>;
}

struct PeriodicEntry {
    payload: ReminderPayload,
    schedule: CronSchedule,
    next_fire: DateTime<Utc>,
}

/// Engine backed by the shared SQLite database and an in-memory periodic table.
pub struct LocalEngine {
    db: Database,
    clock: Arc<dyn Clock>,
    periodic: Mutex<HashMap<EngineHandle, PeriodicEntry>>,
    next_periodic: AtomicI64,
    events: broadcast::Sender<CompletionEvent>,
}

impl LocalEngine {
    /// Prepare the run table and requeue runs a previous process left mid-delivery.
    pub async fn open(db: Database, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        let requeued = db
            .call(|conn| {
                store::ensure_schema(conn)?;
                store::requeue_interrupted(conn)
            })
            .await?;
        if requeued > 0 {
            info!(count = requeued, "Requeued interrupted engine runs");
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            db,
            clock,
            periodic: Mutex::new(HashMap::new()),
            next_periodic: AtomicI64::new(1),
            events,
        })
    }

    /// State of a once-off run.
    pub async fn once_state(&self, handle: EngineHandle) -> Result<Option<RunState>, EngineError> {
        Ok(self
            .db
            .call(move |conn| store::run_state(conn, handle))
            .await?)
    }

    /// Number of live periodic registrations.
    pub fn periodic_count(&self) -> usize {
        self.periodic.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Deliver everything due now. Returns the number of successful deliveries.
    pub async fn run_due(&self, worker: &dyn JobWorker) -> Result<usize, EngineError> {
        let now = self.clock.now();
        let mut delivered = 0;

        let due = self.db.call(move |conn| store::claim_due(conn, now)).await?;
        for run in due {
            let handle = run.handle;
            // A bookkeeping failure must not strand the rest of the claimed runs.
            match worker.work(JobKind::Scheduled, &run.payload).await {
                Ok(()) => {
                    let marked: Result<(), StorageError> = self
                        .db
                        .call(move |conn| store::mark_completed(conn, handle))
                        .await;
                    if let Err(e) = marked {
                        warn!(%handle, "Failed to mark once-off job completed: {e}");
                    }
                    debug!(%handle, chat_id = run.payload.chat_id, "Once-off job delivered");
                    self.publish(handle, JobKind::Scheduled);
                    delivered += 1;
                }
                Err(e) => {
                    warn!(%handle, chat_id = run.payload.chat_id, "Once-off job failed: {e:#}");
                    let error = format!("{e:#}");
                    let marked: Result<(), StorageError> = self
                        .db
                        .call(move |conn| store::mark_failed(conn, handle, &error))
                        .await;
                    if let Err(e) = marked {
                        warn!(%handle, "Failed to mark once-off job failed: {e}");
                    }
                }
            }
        }

        for (handle, payload) in self.take_due_periodic(now) {
            match worker.work(JobKind::Periodic, &payload).await {
                Ok(()) => {
                    debug!(%handle, chat_id = payload.chat_id, "Periodic job delivered");
                    self.publish(handle, JobKind::Periodic);
                    delivered += 1;
                }
                Err(e) => {
                    warn!(%handle, chat_id = payload.chat_id, "Periodic job failed: {e:#}");
                }
            }
        }

        Ok(delivered)
    }

    /// Collect due periodic jobs and advance each to its next fire time.
    fn take_due_periodic(&self, now: DateTime<Utc>) -> Vec<(EngineHandle, ReminderPayload)> {
        let mut periodic = self.periodic.lock().unwrap_or_else(|e| e.into_inner());
        let mut due = Vec::new();
        let mut exhausted = Vec::new();

        for (handle, entry) in periodic.iter_mut() {
            if entry.next_fire > now {
                continue;
            }
            due.push((*handle, entry.payload.clone()));
            match entry.schedule.next_after(now) {
                Some(next) => entry.next_fire = next,
                None => exhausted.push(*handle),
            }
        }
        for handle in exhausted {
            warn!(%handle, "Periodic job has no further fire time, removing");
            periodic.remove(&handle);
        }

        due.sort_by_key(|(handle, _)| *handle);
        due
    }

    fn publish(&self, handle: EngineHandle, kind: JobKind) {
        // No subscribers is fine.
        let _ = self.events.send(CompletionEvent { handle, kind });
    }

    /// Tick until cancelled.
    pub async fn run(
        self: Arc<Self>,
        worker: Arc<dyn JobWorker>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) {
        info!(poll_ms = poll_interval.as_millis() as u64, "Scheduling engine started");
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_due(worker.as_ref()).await {
                        warn!("Scheduling engine tick failed: {e}");
                    }
                }
            }
        }
        info!("Scheduling engine stopped");
    }
}

#[async_trait]
impl JobEngine for LocalEngine {
    fn register_once(
        &self,
        conn: &Connection,
        payload: &ReminderPayload,
        fire_at: DateTime<Utc>,
    ) -> Result<EngineHandle, EngineError> {
        let handle = store::insert_run(conn, payload, fire_at)?;
        debug!(%handle, chat_id = payload.chat_id, %fire_at, "Once-off job queued");
        Ok(handle)
    }

    async fn cancel_once(&self, handle: EngineHandle) -> Result<(), EngineError> {
        let state = self
            .db
            .call(move |conn| store::cancel_run(conn, handle))
            .await?;
        match state {
            None => Err(EngineError::NotFound(handle)),
            Some(RunState::Cancelled) => {
                debug!(%handle, "Once-off job cancelled");
                Ok(())
            }
            Some(other) => {
                debug!(%handle, state = other.as_str(), "Once-off job already past the queue");
                Ok(())
            }
        }
    }

    fn register_periodic(
        &self,
        payload: ReminderPayload,
        schedule: CronSchedule,
    ) -> Result<EngineHandle, EngineError> {
        let next_fire = schedule
            .next_after(self.clock.now())
            .ok_or_else(|| EngineError::NeverFires(schedule.to_string()))?;
        let handle = EngineHandle(self.next_periodic.fetch_add(1, Ordering::Relaxed));

        debug!(%handle, chat_id = payload.chat_id, schedule = %schedule, %next_fire, "Periodic job registered");
        self.periodic.lock().unwrap_or_else(|e| e.into_inner()).insert(
            handle,
            PeriodicEntry {
                payload,
                schedule,
                next_fire,
            },
        );
        Ok(handle)
    }

    fn remove_periodic(&self, handle: EngineHandle) -> bool {
        let removed = self
            .periodic
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle)
            .is_some();
        if removed {
            debug!(%handle, "Periodic job removed");
        }
        removed
    }

    fn subscribe(&self) -> broadcast::Receiver<CompletionEvent> {
        self.events.subscribe()
    }
}
