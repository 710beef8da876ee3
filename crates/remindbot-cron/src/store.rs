//! SQLite-backed queue of once-off engine runs.
//!
//! Runs live in the same database as the reminder tables so a registration can
//! join the caller's transaction. Every function takes a plain `&Connection`;
//! pass a `Transaction` to participate in one.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use remindbot_storage::Result;
use remindbot_types::{EngineHandle, ReminderPayload};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS engine_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id INTEGER NOT NULL,
        message TEXT NOT NULL,
        fire_at INTEGER NOT NULL,
        state TEXT NOT NULL DEFAULT 'available',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at TEXT NOT NULL,
        finalized_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_engine_runs_due
        ON engine_runs(fire_at) WHERE state = 'available';
";

/// Lifecycle of a once-off run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Available,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A run claimed for delivery.
#[derive(Debug, Clone)]
pub struct DueRun {
    pub handle: EngineHandle,
    pub payload: ReminderPayload,
    pub fire_at: DateTime<Utc>,
}

/// Create the run table if needed.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Put runs interrupted mid-delivery back in the queue.
pub fn requeue_interrupted(conn: &Connection) -> Result<usize> {
    let count = conn.execute(
        "UPDATE engine_runs SET state = 'available' WHERE state = 'running'",
        [],
    )?;
    Ok(count)
}

/// Queue a run; the row ID is the engine handle.
pub fn insert_run(
    conn: &Connection,
    payload: &ReminderPayload,
    fire_at: DateTime<Utc>,
) -> Result<EngineHandle> {
    conn.execute(
        "INSERT INTO engine_runs (chat_id, message, fire_at, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            payload.chat_id,
            payload.message,
            fire_at.timestamp(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(EngineHandle(conn.last_insert_rowid()))
}

/// Current state of a run, `None` if the handle is unknown.
pub fn run_state(conn: &Connection, handle: EngineHandle) -> Result<Option<RunState>> {
    let state = conn
        .query_row(
            "SELECT state FROM engine_runs WHERE id = ?1",
            rusqlite::params![handle.0],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(state.and_then(|s| RunState::parse(&s)))
}

/// Cancel a queued run. Returns the state the run ends up in.
pub fn cancel_run(conn: &Connection, handle: EngineHandle) -> Result<Option<RunState>> {
    conn.execute(
        "UPDATE engine_runs SET state = 'cancelled', finalized_at = ?1
         WHERE id = ?2 AND state = 'available'",
        rusqlite::params![Utc::now().to_rfc3339(), handle.0],
    )?;
    run_state(conn, handle)
}

/// Claim every run due at `now`, moving it to `running`.
pub fn claim_due(conn: &mut Connection, now: DateTime<Utc>) -> Result<Vec<DueRun>> {
    let tx = conn.transaction()?;
    let runs = {
        let mut stmt = tx.prepare(
            "SELECT id, chat_id, message, fire_at FROM engine_runs
             WHERE state = 'available' AND fire_at <= ?1
             ORDER BY fire_at, id",
        )?;
        stmt.query_map(rusqlite::params![now.timestamp()], |row| {
            let fire_at: i64 = row.get(3)?;
            Ok(DueRun {
                handle: EngineHandle(row.get(0)?),
                payload: ReminderPayload {
                    chat_id: row.get(1)?,
                    message: row.get(2)?,
                },
                fire_at: Utc.timestamp_opt(fire_at, 0).single().unwrap_or(now),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
    };

    for run in &runs {
        tx.execute(
            "UPDATE engine_runs SET state = 'running', attempts = attempts + 1 WHERE id = ?1",
            rusqlite::params![run.handle.0],
        )?;
    }
    tx.commit()?;
    Ok(runs)
}

/// Finalize a delivered run.
pub fn mark_completed(conn: &Connection, handle: EngineHandle) -> Result<()> {
    conn.execute(
        "UPDATE engine_runs SET state = 'completed', finalized_at = ?1 WHERE id = ?2",
        rusqlite::params![Utc::now().to_rfc3339(), handle.0],
    )?;
    Ok(())
}

/// Finalize a run whose delivery failed.
pub fn mark_failed(conn: &Connection, handle: EngineHandle, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE engine_runs SET state = 'failed', last_error = ?1, finalized_at = ?2 WHERE id = ?3",
        rusqlite::params![error, Utc::now().to_rfc3339(), handle.0],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    fn payload() -> ReminderPayload {
        ReminderPayload {
            chat_id: 42,
            message: "Pay rent!".into(),
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_claim_only_due_runs() {
        let mut conn = conn();
        let early = insert_run(&conn, &payload(), at("2025-01-01T00:00:00Z")).unwrap();
        let late = insert_run(&conn, &payload(), at("2025-01-02T00:00:00Z")).unwrap();

        let due = claim_due(&mut conn, at("2025-01-01T12:00:00Z")).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].handle, early);
        assert_eq!(due[0].payload.message, "Pay rent!");
        assert_eq!(run_state(&conn, early).unwrap(), Some(RunState::Running));
        assert_eq!(run_state(&conn, late).unwrap(), Some(RunState::Available));

        // A claimed run is not handed out twice.
        assert!(claim_due(&mut conn, at("2025-01-01T12:00:00Z")).unwrap().is_empty());
    }

    #[test]
    fn test_cancel_only_affects_queued_runs() {
        let mut conn = conn();
        let queued = insert_run(&conn, &payload(), at("2025-01-02T00:00:00Z")).unwrap();
        let done = insert_run(&conn, &payload(), at("2025-01-01T00:00:00Z")).unwrap();
        claim_due(&mut conn, at("2025-01-01T00:00:00Z")).unwrap();
        mark_completed(&conn, done).unwrap();

        assert_eq!(cancel_run(&conn, queued).unwrap(), Some(RunState::Cancelled));
        assert_eq!(cancel_run(&conn, done).unwrap(), Some(RunState::Completed));
        assert_eq!(cancel_run(&conn, EngineHandle(99)).unwrap(), None);
    }

    #[test]
    fn test_insert_rolls_back_with_transaction() {
        let mut conn = conn();
        let handle = {
            let tx = conn.transaction().unwrap();
            insert_run(&tx, &payload(), at("2025-01-01T00:00:00Z")).unwrap()
        };
        assert_eq!(run_state(&conn, handle).unwrap(), None);
    }

    #[test]
    fn test_requeue_interrupted() {
        let mut conn = conn();
        let handle = insert_run(&conn, &payload(), at("2025-01-01T00:00:00Z")).unwrap();
        claim_due(&mut conn, at("2025-01-01T00:00:00Z")).unwrap();

        assert_eq!(requeue_interrupted(&conn).unwrap(), 1);
        assert_eq!(run_state(&conn, handle).unwrap(), Some(RunState::Available));
    }

    #[test]
    fn test_mark_failed_keeps_error() {
        let mut conn = conn();
        let handle = insert_run(&conn, &payload(), at("2025-01-01T00:00:00Z")).unwrap();
        claim_due(&mut conn, at("2025-01-01T00:00:00Z")).unwrap();
        mark_failed(&conn, handle, "chat not found").unwrap();

        let error: String = conn
            .query_row(
                "SELECT last_error FROM engine_runs WHERE id = ?1",
                [handle.0],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(error, "chat not found");
        assert_eq!(run_state(&conn, handle).unwrap(), Some(RunState::Failed));
    }
}
