//! Job queue storage and persistence.
//!
//! SQLite-backed queue with atomic claim semantics. All state transitions go
//! through single UPDATE statements guarded by the expected current status,
//! so two workers can never both own a job.

use super::models::{Job, JobKind, JobStatus};
use super::schema::JOBS_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned_database;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Retention for terminal jobs: the most recent N of each class survive.
pub const KEEP_COMPLETED: usize = 100;
pub const KEEP_FAILED: usize = 50;

pub trait JobStore: Send + Sync {
    /// Add a new pending job.
    fn enqueue(&self, job: &Job) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Atomically claim the next pending job (lowest priority number first,
    /// then oldest). Increments its attempt count and stamps `started_at`.
    fn claim_next_pending(&self) -> Result<Option<Job>>;

    fn mark_completed(&self, id: &str) -> Result<()>;

    fn mark_retry_waiting(&self, id: &str, next_retry_at: i64, error: &str) -> Result<()>;

    fn mark_failed(&self, id: &str, error: &str) -> Result<()>;

    fn mark_cancelled(&self, id: &str) -> Result<()>;

    /// Move retry-waiting jobs whose backoff elapsed back to pending.
    /// Returns how many were promoted.
    fn promote_ready_retries(&self) -> Result<usize>;

    /// Apply the completed/failed retention policy.
    fn trim_finished(&self) -> Result<()>;

    /// Jobs for one session, newest first.
    fn list_for_session(&self, session_id: &str) -> Result<Vec<Job>>;
}

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_database(db_path, JOBS_VERSIONED_SCHEMAS, "jobs")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        JOBS_VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let kind: String = row.get("kind")?;
        let status: String = row.get("status")?;
        Ok(Job {
            id: row.get("id")?,
            kind: JobKind::parse(&kind).unwrap_or(JobKind::Process),
            session_id: row.get("session_id")?,
            file_id: row.get("file_id")?,
            priority: row.get("priority")?,
            status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            next_retry_at: row.get("next_retry_at")?,
            attempt_count: row.get("attempt_count")?,
            max_attempts: row.get("max_attempts")?,
            error_message: row.get("error_message")?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, kind, session_id, file_id, priority, status, created_at, \
     started_at, completed_at, next_retry_at, attempt_count, max_attempts, error_message";

impl JobStore for SqliteJobStore {
    fn enqueue(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs (id, kind, session_id, file_id, priority, status, created_at, \
             attempt_count, max_attempts) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.kind.queue_name(),
                job.session_id,
                job.file_id,
                job.priority,
                job.status.as_str(),
                job.created_at,
                job.attempt_count,
                job.max_attempts,
            ],
        )
        .with_context(|| format!("Failed to enqueue job {}", job.id))?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                Self::row_to_job,
            )
            .optional()
            .with_context(|| format!("Failed to load job {}", id))?;
        Ok(job)
    }

    fn claim_next_pending(&self) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp();
        let claimed_id: Option<String> = conn
            .query_row(
                "UPDATE jobs SET status = 'IN_PROGRESS', started_at = ?1, \
                 attempt_count = attempt_count + 1 \
                 WHERE id = (SELECT id FROM jobs WHERE status = 'PENDING' \
                             ORDER BY priority ASC, created_at ASC LIMIT 1) \
                 RETURNING id",
                params![now],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to claim next pending job")?;

        match claimed_id {
            None => Ok(None),
            Some(id) => {
                let job = conn
                    .query_row(
                        &format!("SELECT {} FROM jobs WHERE id = ?1", SELECT_COLUMNS),
                        params![id],
                        Self::row_to_job,
                    )
                    .context("Failed to reload claimed job")?;
                Ok(Some(job))
            }
        }
    }

    fn mark_completed(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'COMPLETED', completed_at = ?2, next_retry_at = NULL \
             WHERE id = ?1 AND status = 'IN_PROGRESS'",
            params![id, Utc::now().timestamp()],
        )
        .with_context(|| format!("Failed to complete job {}", id))?;
        Ok(())
    }

    fn mark_retry_waiting(&self, id: &str, next_retry_at: i64, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'RETRY_WAITING', next_retry_at = ?2, error_message = ?3 \
             WHERE id = ?1 AND status = 'IN_PROGRESS'",
            params![id, next_retry_at, error],
        )
        .with_context(|| format!("Failed to mark job {} for retry", id))?;
        Ok(())
    }

    fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'FAILED', completed_at = ?2, error_message = ?3 \
             WHERE id = ?1 AND status IN ('IN_PROGRESS', 'RETRY_WAITING')",
            params![id, Utc::now().timestamp(), error],
        )
        .with_context(|| format!("Failed to fail job {}", id))?;
        Ok(())
    }

    fn mark_cancelled(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'CANCELLED', completed_at = ?2 \
             WHERE id = ?1 AND NOT status IN ('COMPLETED', 'FAILED')",
            params![id, Utc::now().timestamp()],
        )
        .with_context(|| format!("Failed to cancel job {}", id))?;
        Ok(())
    }

    fn promote_ready_retries(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let promoted = conn
            .execute(
                "UPDATE jobs SET status = 'PENDING', next_retry_at = NULL \
                 WHERE status = 'RETRY_WAITING' AND next_retry_at <= ?1",
                params![Utc::now().timestamp()],
            )
            .context("Failed to promote ready retries")?;
        Ok(promoted)
    }

    fn trim_finished(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM jobs WHERE status = 'COMPLETED' AND id NOT IN \
             (SELECT id FROM jobs WHERE status = 'COMPLETED' \
              ORDER BY completed_at DESC LIMIT ?1)",
            params![KEEP_COMPLETED as i64],
        )?;
        conn.execute(
            "DELETE FROM jobs WHERE status = 'FAILED' AND id NOT IN \
             (SELECT id FROM jobs WHERE status = 'FAILED' \
              ORDER BY completed_at DESC LIMIT ?1)",
            params![KEEP_FAILED as i64],
        )?;
        Ok(())
    }

    fn list_for_session(&self, session_id: &str) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE session_id = ?1 ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![session_id], Self::row_to_job)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list session jobs")?;
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteJobStore {
        SqliteJobStore::in_memory().unwrap()
    }

    #[test]
    fn claim_takes_lowest_priority_number_first() {
        let store = store();
        let mut low_urgency = Job::new(JobKind::Process, "s-1", None);
        low_urgency.priority = 9;
        let mut high_urgency = Job::new(JobKind::Process, "s-2", None);
        high_urgency.priority = 1;
        store.enqueue(&low_urgency).unwrap();
        store.enqueue(&high_urgency).unwrap();

        let claimed = store.claim_next_pending().unwrap().unwrap();
        assert_eq!(claimed.session_id, "s-2");
        assert_eq!(claimed.status, JobStatus::InProgress);
        assert_eq!(claimed.attempt_count, 1);
    }

    #[test]
    fn claimed_jobs_are_not_claimed_twice() {
        let store = store();
        store.enqueue(&Job::new(JobKind::Process, "s-1", None)).unwrap();

        assert!(store.claim_next_pending().unwrap().is_some());
        assert!(store.claim_next_pending().unwrap().is_none());
    }

    #[test]
    fn retry_cycle_promotes_when_due() {
        let store = store();
        let job = Job::new(JobKind::Process, "s-1", None);
        store.enqueue(&job).unwrap();
        let claimed = store.claim_next_pending().unwrap().unwrap();

        // Due in the past: promotable immediately.
        store
            .mark_retry_waiting(&claimed.id, Utc::now().timestamp() - 1, "boom")
            .unwrap();
        assert_eq!(store.promote_ready_retries().unwrap(), 1);

        let reclaimed = store.claim_next_pending().unwrap().unwrap();
        assert_eq!(reclaimed.attempt_count, 2);
    }

    #[test]
    fn future_retries_are_not_promoted() {
        let store = store();
        let job = Job::new(JobKind::Process, "s-1", None);
        store.enqueue(&job).unwrap();
        let claimed = store.claim_next_pending().unwrap().unwrap();
        store
            .mark_retry_waiting(&claimed.id, Utc::now().timestamp() + 3600, "boom")
            .unwrap();

        assert_eq!(store.promote_ready_retries().unwrap(), 0);
        assert!(store.claim_next_pending().unwrap().is_none());
    }

    #[test]
    fn completed_jobs_keep_only_the_most_recent() {
        let store = store();
        for i in 0..(KEEP_COMPLETED + 5) {
            let job = Job::new(JobKind::Process, format!("s-{}", i), None);
            store.enqueue(&job).unwrap();
            let claimed = store.claim_next_pending().unwrap().unwrap();
            store.mark_completed(&claimed.id).unwrap();
        }
        store.trim_finished().unwrap();

        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE status = 'COMPLETED'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, KEEP_COMPLETED as i64);
    }

    #[test]
    fn mark_failed_records_the_error() {
        let store = store();
        store.enqueue(&Job::new(JobKind::SecondPass, "s-1", None)).unwrap();
        let claimed = store.claim_next_pending().unwrap().unwrap();
        store.mark_failed(&claimed.id, "budget exhausted").unwrap();

        let job = store.get(&claimed.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("budget exhausted"));
    }
}
