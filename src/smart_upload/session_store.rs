//! Upload session storage.
//!
//! The processor owns a session exclusively while a job runs; the store's
//! contract is that `update` writes every mutable field in one statement so a
//! reader never observes a half-updated session.

use super::models::{
    CuttingInstruction, ExtractedMetadata, LlmProvenance, ParseStatus, ParsedPart, RoutingDecision,
    SecondPassStatus, UploadSession,
};
use super::schema::SESSION_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned_database;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Trait for upload session storage operations.
pub trait SessionStore: Send + Sync {
    /// Insert a freshly created session.
    fn create(&self, session: &UploadSession) -> Result<()>;

    /// Load a session by id.
    fn get(&self, id: &str) -> Result<Option<UploadSession>>;

    /// Write back every mutable field of the session in a single statement.
    fn update(&self, session: &UploadSession) -> Result<()>;

    /// Most recent sessions, newest first.
    fn list_recent(&self, limit: usize) -> Result<Vec<UploadSession>>;
}

pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_database(db_path, SESSION_VERSIONED_SCHEMAS, "sessions")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        SESSION_VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<UploadSession> {
        let created_at: i64 = row.get("created_at")?;
        let updated_at: i64 = row.get("updated_at")?;
        let routing: Option<String> = row.get("routing_decision")?;
        let parse_status: String = row.get("parse_status")?;
        let second_pass: Option<String> = row.get("second_pass_status")?;
        let metadata_json: Option<String> = row.get("extracted_metadata")?;
        let parts_json: Option<String> = row.get("parsed_parts")?;
        let instructions_json: Option<String> = row.get("cutting_instructions")?;
        let temp_files_json: Option<String> = row.get("temp_files")?;
        let model_params_json: Option<String> = row.get("llm_model_params")?;

        Ok(UploadSession {
            id: row.get("id")?,
            original_filename: row.get("original_filename")?,
            byte_size: row.get::<_, i64>("byte_size")? as u64,
            mime_type: row.get("mime_type")?,
            storage_key: row.get("storage_key")?,
            uploaded_by: row.get("uploaded_by")?,
            created_at: Utc
                .timestamp_opt(created_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
            updated_at: Utc
                .timestamp_opt(updated_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
            extracted_metadata: metadata_json
                .as_deref()
                .and_then(|j| serde_json::from_str::<ExtractedMetadata>(j).ok()),
            confidence_score: row.get("confidence_score")?,
            final_confidence: row.get("final_confidence")?,
            routing_decision: routing.as_deref().and_then(RoutingDecision::parse),
            parse_status: ParseStatus::parse(&parse_status).unwrap_or(ParseStatus::NotParsed),
            second_pass_status: SecondPassStatus::parse(second_pass.as_deref())
                .unwrap_or(SecondPassStatus::NotNeeded),
            auto_approved: row.get::<_, i64>("auto_approved")? != 0,
            requires_human_review: row.get::<_, i64>("requires_human_review")? != 0,
            parsed_parts: parts_json
                .as_deref()
                .and_then(|j| serde_json::from_str::<Vec<ParsedPart>>(j).ok())
                .unwrap_or_default(),
            cutting_instructions: instructions_json
                .as_deref()
                .and_then(|j| serde_json::from_str::<Vec<CuttingInstruction>>(j).ok())
                .unwrap_or_default(),
            temp_files: temp_files_json
                .as_deref()
                .and_then(|j| serde_json::from_str::<Vec<String>>(j).ok())
                .unwrap_or_default(),
            first_pass_raw: row.get("first_pass_raw")?,
            notes: row.get("notes")?,
            provenance: LlmProvenance {
                provider: row.get("llm_provider")?,
                vision_model: row.get("llm_vision_model")?,
                verification_model: row.get("llm_verification_model")?,
                model_params: model_params_json
                    .as_deref()
                    .and_then(|j| serde_json::from_str(j).ok()),
                prompt_version: row.get("prompt_version")?,
            },
        })
    }
}

const SELECT_COLUMNS: &str = "id, original_filename, byte_size, mime_type, storage_key, \
     uploaded_by, created_at, updated_at, extracted_metadata, confidence_score, \
     final_confidence, routing_decision, parse_status, second_pass_status, auto_approved, \
     requires_human_review, parsed_parts, cutting_instructions, temp_files, first_pass_raw, \
     notes, llm_provider, llm_vision_model, llm_verification_model, llm_model_params, \
     prompt_version";

impl SessionStore for SqliteSessionStore {
    fn create(&self, session: &UploadSession) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO upload_sessions (id, original_filename, byte_size, mime_type, \
             storage_key, uploaded_by, created_at, updated_at, parse_status, second_pass_status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session.id,
                session.original_filename,
                session.byte_size as i64,
                session.mime_type,
                session.storage_key,
                session.uploaded_by,
                session.created_at.timestamp(),
                session.updated_at.timestamp(),
                session.parse_status.as_str(),
                session.second_pass_status.as_str(),
            ],
        )
        .with_context(|| format!("Failed to create session {}", session.id))?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<UploadSession>> {
        let conn = self.conn.lock().unwrap();
        let session = conn
            .query_row(
                &format!("SELECT {} FROM upload_sessions WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                Self::row_to_session,
            )
            .optional()
            .with_context(|| format!("Failed to load session {}", id))?;
        Ok(session)
    }

    fn update(&self, session: &UploadSession) -> Result<()> {
        let metadata_json = session
            .extracted_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let parts_json = serde_json::to_string(&session.parsed_parts)?;
        let instructions_json = serde_json::to_string(&session.cutting_instructions)?;
        let temp_files_json = serde_json::to_string(&session.temp_files)?;
        let model_params_json = session
            .provenance
            .model_params
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE upload_sessions SET \
                 updated_at = ?2, extracted_metadata = ?3, confidence_score = ?4, \
                 final_confidence = ?5, routing_decision = ?6, parse_status = ?7, \
                 second_pass_status = ?8, auto_approved = ?9, requires_human_review = ?10, \
                 parsed_parts = ?11, cutting_instructions = ?12, temp_files = ?13, \
                 first_pass_raw = ?14, notes = ?15, llm_provider = ?16, llm_vision_model = ?17, \
                 llm_verification_model = ?18, llm_model_params = ?19, prompt_version = ?20 \
                 WHERE id = ?1",
                params![
                    session.id,
                    Utc::now().timestamp(),
                    metadata_json,
                    session.confidence_score,
                    session.final_confidence,
                    session.routing_decision.map(|r| r.as_str()),
                    session.parse_status.as_str(),
                    session.second_pass_status.as_str(),
                    session.auto_approved as i64,
                    session.requires_human_review as i64,
                    parts_json,
                    instructions_json,
                    temp_files_json,
                    session.first_pass_raw,
                    session.notes,
                    session.provenance.provider,
                    session.provenance.vision_model,
                    session.provenance.verification_model,
                    model_params_json,
                    session.provenance.prompt_version,
                ],
            )
            .with_context(|| format!("Failed to update session {}", session.id))?;
        anyhow::ensure!(updated == 1, "Session {} does not exist", session.id);
        Ok(())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<UploadSession>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM upload_sessions ORDER BY created_at DESC LIMIT ?1",
            SELECT_COLUMNS
        ))?;
        let sessions = stmt
            .query_map(params![limit as i64], Self::row_to_session)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list sessions")?;
        Ok(sessions)
    }
}
