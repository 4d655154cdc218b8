//! Database schema for jobs.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const JOBS_TABLE_V1: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("session_id", &SqlType::Text, non_null = true),
        sqlite_column!("file_id", &SqlType::Text),
        sqlite_column!("priority", &SqlType::Integer, non_null = true, default_value = Some("5")),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("completed_at", &SqlType::Integer),
        sqlite_column!("next_retry_at", &SqlType::Integer),
        sqlite_column!("attempt_count", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("max_attempts", &SqlType::Integer, non_null = true, default_value = Some("3")),
        sqlite_column!("error_message", &SqlType::Text),
    ],
    indices: &[
        ("idx_jobs_status_priority", "status, priority, created_at"),
        ("idx_jobs_session", "session_id"),
        ("idx_jobs_next_retry", "next_retry_at"),
    ],
};

pub const JOBS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[JOBS_TABLE_V1],
    migration: None,
}];
