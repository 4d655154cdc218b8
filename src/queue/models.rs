//! Job queue data model.

use serde::Serialize;
use thiserror::Error;

/// The named queues a smart-upload session can pass through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobKind {
    /// First-pass analysis of a fresh upload.
    Process,
    /// Verification-model re-check of a low-confidence session.
    SecondPass,
    /// Terminal commit of an approved session into the library.
    AutoCommit,
}

impl JobKind {
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobKind::Process => "smartupload.process",
            JobKind::SecondPass => "smartupload.second_pass",
            JobKind::AutoCommit => "smartupload.auto_commit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "smartupload.process" => Some(JobKind::Process),
            "smartupload.second_pass" => Some(JobKind::SecondPass),
            "smartupload.auto_commit" => Some(JobKind::AutoCommit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Pending,
    InProgress,
    RetryWaiting,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::RetryWaiting => "RETRY_WAITING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "IN_PROGRESS" => Some(JobStatus::InProgress),
            "RETRY_WAITING" => Some(JobStatus::RetryWaiting),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

pub const DEFAULT_PRIORITY: i32 = 5;
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// One queued job. `file_id` identifies the stored original for process jobs.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub session_id: String,
    pub file_id: Option<String>,
    /// Lower numbers run first.
    pub priority: i32,
    pub status: JobStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub next_retry_at: Option<i64>,
    /// Attempts started so far (incremented on claim).
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(kind: JobKind, session_id: impl Into<String>, file_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            session_id: session_id.into(),
            file_id,
            priority: DEFAULT_PRIORITY,
            status: JobStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            next_retry_at: None,
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            error_message: None,
        }
    }
}

/// How a job execution ended, as seen by the worker loop.
#[derive(Debug, Error)]
pub enum JobError {
    /// Never retried: missing session, invalid stored content, bad config,
    /// exhausted budget.
    #[error("{0}")]
    Fatal(String),

    /// Transient; the queue retries with backoff up to `max_attempts`.
    #[error("{0}")]
    Retryable(String),

    /// The shutdown/cancellation signal fired; no further state writes.
    #[error("job cancelled")]
    Cancelled,
}
