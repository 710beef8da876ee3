//! remindbot-storage: SQLite-based persistence for chat forms and reminder jobs.
//!
//! Two tables live here: `chats` (one draft context per chat) and `jobs`
//! (confirmed reminders). Both are soft-deleted through a `deleted_at`
//! tombstone. The scheduling engine keeps its own tables in the same database
//! so job registration can share a transaction with the job insert.

pub mod chats;
pub mod jobs;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

pub use chats::{ChatContext, ChatRecord};
pub use jobs::{JobRecord, NewJob};

use remindbot_types::{ChatId, EngineHandle};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Malformed chat context: {0}")]
    Context(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS chats (
        chat_id INTEGER PRIMARY KEY,
        context TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );

    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id INTEGER NOT NULL,
        is_recurring INTEGER NOT NULL,
        message TEXT NOT NULL,
        schedule TEXT NOT NULL,
        name TEXT NOT NULL,
        engine_handle INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_chat ON jobs(chat_id) WHERE deleted_at IS NULL;

    CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_live_handle
        ON jobs(engine_handle, is_recurring)
        WHERE deleted_at IS NULL AND engine_handle IS NOT NULL;
";

/// Shared SQLite connection.
///
/// Cloning is cheap; all clones talk to the same connection. Work runs on the
/// blocking pool so the async runtime never waits on disk I/O.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Self::from_connection(conn)?;
        tracing::info!("Storage opened: {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// `f` may open a transaction with `Connection::transaction`; dropping it
    /// without commit rolls everything back.
    pub async fn call<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Connection) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| E::from(StorageError::Join(e)))?
    }
}

/// Async facade over the `chats` and `jobs` tables.
#[derive(Clone)]
pub struct ReminderStore {
    db: Database,
}

impl ReminderStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Underlying database, for callers that need a shared transaction.
    pub fn database(&self) -> &Database {
        &self.db
    }

    // ─── Chat Contexts ──────────────────────────────────────

    /// Get the live chat row, if any.
    pub async fn get_chat(&self, chat_id: ChatId) -> Result<Option<ChatRecord>> {
        self.db.call(move |conn| chats::get_live(conn, chat_id)).await
    }

    /// Create the chat row or reset its context to `{}`, reviving tombstoned rows.
    pub async fn reset_chat(&self, chat_id: ChatId) -> Result<ChatRecord> {
        self.db.call(move |conn| chats::reset(conn, chat_id)).await
    }

    /// Overwrite the context of a live chat. Returns false when no live row exists.
    pub async fn update_chat_context(&self, chat_id: ChatId, context: &ChatContext) -> Result<bool> {
        let context = context.clone();
        self.db
            .call(move |conn| chats::update_context(conn, chat_id, &context))
            .await
    }

    // ─── Jobs ───────────────────────────────────────────────

    /// Get a live job by ID.
    pub async fn get_job(&self, id: i64) -> Result<Option<JobRecord>> {
        self.db.call(move |conn| jobs::get_live(conn, id)).await
    }

    /// List live jobs of a chat, oldest first.
    pub async fn list_active_jobs(&self, chat_id: ChatId) -> Result<Vec<JobRecord>> {
        self.db.call(move |conn| jobs::list_live_by_chat(conn, chat_id)).await
    }

    /// Soft-delete a job by ID.
    pub async fn soft_delete_job(&self, id: i64) -> Result<bool> {
        self.db.call(move |conn| jobs::soft_delete(conn, id)).await
    }

    /// Soft-delete the live once-off job registered under `handle`.
    pub async fn soft_delete_scheduled_job_by_handle(&self, handle: EngineHandle) -> Result<bool> {
        self.db
            .call(move |conn| jobs::soft_delete_scheduled_by_handle(conn, handle))
            .await
    }
}
