//! Retires once-off jobs when the engine reports them done.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use remindbot_storage::ReminderStore;
use remindbot_types::{CompletionEvent, JobKind};

use crate::error::ReminderError;

pub struct CompletionReactor {
    store: ReminderStore,
}

impl CompletionReactor {
    pub fn new(store: ReminderStore) -> Self {
        Self { store }
    }

    /// Apply one completion event. Returns whether a job row was retired.
    ///
    /// Duplicate events are harmless: the second soft-delete matches nothing.
    pub async fn handle(&self, event: CompletionEvent) -> Result<bool, ReminderError> {
        match event.kind {
            JobKind::Scheduled => {
                let retired = self
                    .store
                    .soft_delete_scheduled_job_by_handle(event.handle)
                    .await?;
                if retired {
                    info!(handle = %event.handle, "Once-off job completed");
                } else {
                    debug!(handle = %event.handle, "No live job for completed handle");
                }
                Ok(retired)
            }
            // Recurring jobs never finish on their own.
            JobKind::Periodic => Ok(false),
        }
    }

    /// Consume completion events until the stream closes or `cancel` fires.
    pub fn spawn(
        self,
        mut events: broadcast::Receiver<CompletionEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Completion reactor started");
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => {
                        if let Err(e) = self.handle(event).await {
                            warn!(handle = %event.handle, kind = %event.kind, "Failed to apply completion event: {e}");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Completion reactor lagged behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!("Completion reactor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remindbot_storage::{Database, NewJob, jobs};
    use remindbot_types::EngineHandle;

    async fn store_with_job(is_recurring: bool, handle: i64) -> (ReminderStore, i64) {
        let store = ReminderStore::new(Database::open_in_memory().unwrap());
        let job = store
            .database()
            .call(move |conn| {
                jobs::insert(
                    conn,
                    &NewJob {
                        chat_id: 42,
                        is_recurring,
                        message: "Pay rent!".into(),
                        schedule: "2099-01-01 00:00:00".into(),
                        name: "Rent".into(),
                        engine_handle: EngineHandle(handle),
                    },
                )
            })
            .await
            .unwrap();
        (store, job.id)
    }

    fn event(handle: i64, kind: JobKind) -> CompletionEvent {
        CompletionEvent {
            handle: EngineHandle(handle),
            kind,
        }
    }

    #[tokio::test]
    async fn test_scheduled_completion_is_idempotent() {
        let (store, id) = store_with_job(false, 5).await;
        let reactor = CompletionReactor::new(store.clone());

        assert!(reactor.handle(event(5, JobKind::Scheduled)).await.unwrap());
        assert!(store.get_job(id).await.unwrap().is_none());
        assert!(!reactor.handle(event(5, JobKind::Scheduled)).await.unwrap());
    }

    #[tokio::test]
    async fn test_periodic_completion_ignored() {
        let (store, id) = store_with_job(true, 5).await;
        let reactor = CompletionReactor::new(store.clone());

        assert!(!reactor.handle(event(5, JobKind::Periodic)).await.unwrap());
        // Same handle under the other kind does not touch the recurring row.
        assert!(!reactor.handle(event(5, JobKind::Scheduled)).await.unwrap());
        assert!(store.get_job(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_spawned_reactor_stops_when_stream_closes() {
        let (store, id) = store_with_job(false, 3).await;
        let (tx, rx) = broadcast::channel(8);
        let task = CompletionReactor::new(store.clone()).spawn(rx, CancellationToken::new());

        tx.send(event(99, JobKind::Scheduled)).unwrap();
        tx.send(event(3, JobKind::Scheduled)).unwrap();
        drop(tx);

        task.await.unwrap();
        assert!(store.get_job(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spawned_reactor_stops_on_cancel() {
        let (store, _) = store_with_job(false, 3).await;
        let (_tx, rx) = broadcast::channel::<CompletionEvent>(8);
        let cancel = CancellationToken::new();
        let task = CompletionReactor::new(store).spawn(rx, cancel.clone());

        cancel.cancel();
        task.await.unwrap();
    }
}
