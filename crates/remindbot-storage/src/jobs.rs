//! Confirmed reminder jobs.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use remindbot_types::{ChatId, EngineHandle};

use crate::Result;

/// A confirmed reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub chat_id: ChatId,
    pub is_recurring: bool,
    pub message: String,
    /// `YYYY-MM-DD HH:MM:SS` for once-off jobs, a cron expression otherwise.
    pub schedule: String,
    pub name: String,
    /// Handle into the scheduling engine; `None` until the engine accepts the job.
    pub engine_handle: Option<EngineHandle>,
    pub created_at: DateTime<Utc>,
}

/// Values for a new job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub chat_id: ChatId,
    pub is_recurring: bool,
    pub message: String,
    pub schedule: String,
    pub name: String,
    pub engine_handle: EngineHandle,
}

const COLUMNS: &str = "id, chat_id, is_recurring, message, schedule, name, engine_handle, created_at";

fn map_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        is_recurring: row.get::<_, i64>(2)? != 0,
        message: row.get(3)?,
        schedule: row.get(4)?,
        name: row.get(5)?,
        engine_handle: row.get::<_, Option<i64>>(6)?.map(EngineHandle),
        created_at: row
            .get::<_, String>(7)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Insert a job row, returning it with its assigned ID.
pub fn insert(conn: &Connection, job: &NewJob) -> Result<JobRecord> {
    let created_at = Utc::now();
    let ts = created_at.to_rfc3339();
    conn.execute(
        "INSERT INTO jobs (chat_id, is_recurring, message, schedule, name, engine_handle, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        rusqlite::params![
            job.chat_id,
            job.is_recurring as i64,
            job.message,
            job.schedule,
            job.name,
            job.engine_handle.0,
            ts,
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::debug!(job_id = id, chat_id = job.chat_id, handle = %job.engine_handle, "Job row inserted");

    Ok(JobRecord {
        id,
        chat_id: job.chat_id,
        is_recurring: job.is_recurring,
        message: job.message.clone(),
        schedule: job.schedule.clone(),
        name: job.name.clone(),
        engine_handle: Some(job.engine_handle),
        created_at,
    })
}

/// Get a live job by ID.
pub fn get_live(conn: &Connection, id: i64) -> Result<Option<JobRecord>> {
    let job = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1 AND deleted_at IS NULL"),
            rusqlite::params![id],
            map_row,
        )
        .optional()?;
    Ok(job)
}

/// List live jobs of a chat.
pub fn list_live_by_chat(conn: &Connection, chat_id: ChatId) -> Result<Vec<JobRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM jobs WHERE chat_id = ?1 AND deleted_at IS NULL ORDER BY id"
    ))?;
    let jobs = stmt
        .query_map(rusqlite::params![chat_id], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(jobs)
}

/// List every live recurring job.
pub fn list_live_recurring(conn: &Connection) -> Result<Vec<JobRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM jobs WHERE is_recurring = 1 AND deleted_at IS NULL ORDER BY id"
    ))?;
    let jobs = stmt
        .query_map([], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(jobs)
}

/// Soft-delete a job by ID. Returns false if it was already gone.
pub fn soft_delete(conn: &Connection, id: i64) -> Result<bool> {
    let ts = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE jobs SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        rusqlite::params![ts, id],
    )?;
    Ok(count > 0)
}

/// Soft-delete the live once-off job registered under `handle`.
pub fn soft_delete_scheduled_by_handle(conn: &Connection, handle: EngineHandle) -> Result<bool> {
    let ts = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE jobs SET deleted_at = ?1, updated_at = ?1
         WHERE engine_handle = ?2 AND is_recurring = 0 AND deleted_at IS NULL",
        rusqlite::params![ts, handle.0],
    )?;
    Ok(count > 0)
}

/// Detach every live recurring job from its (stale) engine handle.
pub fn clear_recurring_handles(conn: &Connection) -> Result<usize> {
    let count = conn.execute(
        "UPDATE jobs SET engine_handle = NULL WHERE is_recurring = 1 AND deleted_at IS NULL",
        [],
    )?;
    Ok(count)
}

/// Point a live job at a new engine handle.
pub fn set_engine_handle(conn: &Connection, id: i64, handle: EngineHandle) -> Result<bool> {
    let ts = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE jobs SET engine_handle = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
        rusqlite::params![handle.0, ts, id],
    )?;
    Ok(count > 0)
}
