//! Database schema for sessions.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const UPLOAD_SESSIONS_TABLE_V1: Table = Table {
    name: "upload_sessions",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("original_filename", &SqlType::Text, non_null = true),
        sqlite_column!("byte_size", &SqlType::Integer, non_null = true),
        sqlite_column!("mime_type", &SqlType::Text, non_null = true),
        sqlite_column!("storage_key", &SqlType::Text, non_null = true),
        sqlite_column!("uploaded_by", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("extracted_metadata", &SqlType::Text),
        sqlite_column!(
            "confidence_score",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "final_confidence",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("routing_decision", &SqlType::Text),
        sqlite_column!("parse_status", &SqlType::Text, non_null = true),
        sqlite_column!("second_pass_status", &SqlType::Text),
        sqlite_column!(
            "auto_approved",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "requires_human_review",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("parsed_parts", &SqlType::Text),
        sqlite_column!("cutting_instructions", &SqlType::Text),
        sqlite_column!("temp_files", &SqlType::Text),
        sqlite_column!("first_pass_raw", &SqlType::Text),
        sqlite_column!("notes", &SqlType::Text),
        sqlite_column!("llm_provider", &SqlType::Text),
        sqlite_column!("llm_vision_model", &SqlType::Text),
        sqlite_column!("llm_verification_model", &SqlType::Text),
        sqlite_column!("llm_model_params", &SqlType::Text),
        sqlite_column!("prompt_version", &SqlType::Text),
    ],
    indices: &[
        ("idx_sessions_created", "created_at"),
        ("idx_sessions_parse_status", "parse_status"),
    ],
};

pub const SESSION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[UPLOAD_SESSIONS_TABLE_V1],
    migration: None,
}];
