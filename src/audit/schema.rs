//! Database schema for audit.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const AUDIT_LOG_TABLE_V1: Table = Table {
    name: "audit_log",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!("event_type", &SqlType::Text, non_null = true),
        sqlite_column!("session_id", &SqlType::Text),
        sqlite_column!("actor", &SqlType::Text),
        sqlite_column!("success", &SqlType::Integer, non_null = true, default_value = Some("1")),
        sqlite_column!("details", &SqlType::Text),
    ],
    indices: &[
        ("idx_audit_timestamp", "timestamp"),
        ("idx_audit_event_type", "event_type"),
        ("idx_audit_session", "session_id"),
    ],
};

pub const AUDIT_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[AUDIT_LOG_TABLE_V1],
    migration: None,
}];
