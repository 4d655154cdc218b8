//! Audit logging for configuration changes, provider probes, and terminal
//! job failures.

mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use schema::AUDIT_VERSIONED_SCHEMAS;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::sqlite_persistence::open_versioned_database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditEventType {
    #[serde(rename = "settings_updated")]
    SettingsUpdated,
    #[serde(rename = "prompts_reset")]
    PromptsReset,
    #[serde(rename = "provider_test")]
    ProviderTest,
    #[serde(rename = "job_failed")]
    JobFailed,
    #[serde(rename = "session_auto_committed")]
    SessionAutoCommitted,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::SettingsUpdated => "settings_updated",
            AuditEventType::PromptsReset => "prompts_reset",
            AuditEventType::ProviderTest => "provider_test",
            AuditEventType::JobFailed => "job_failed",
            AuditEventType::SessionAutoCommitted => "session_auto_committed",
        }
    }
}

/// One audit row.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub session_id: Option<String>,
    pub actor: Option<String>,
    pub success: bool,
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            session_id: None,
            actor: None,
            success: true,
            details: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub trait AuditStore: Send + Sync {
    fn append(&self, entry: AuditEntry) -> Result<()>;
    fn list_recent(&self, limit: usize) -> Result<Vec<AuditEntry>>;
}

pub struct SqliteAuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_database(db_path, AUDIT_VERSIONED_SCHEMAS, "audit")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        AUDIT_VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl AuditStore for SqliteAuditStore {
    fn append(&self, entry: AuditEntry) -> Result<()> {
        let details = entry.details.map(|d| d.to_string());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_log (timestamp, event_type, session_id, actor, success, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.timestamp.timestamp(),
                entry.event_type.as_str(),
                entry.session_id,
                entry.actor,
                entry.success as i64,
                details,
            ],
        )
        .context("Failed to append audit entry")?;
        Ok(())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, event_type, session_id, actor, success, details
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], |row| {
                let timestamp: i64 = row.get(0)?;
                let event_type: String = row.get(1)?;
                let details: Option<String> = row.get(5)?;
                Ok(AuditEntry {
                    timestamp: Utc
                        .timestamp_opt(timestamp, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                    event_type: match event_type.as_str() {
                        "settings_updated" => AuditEventType::SettingsUpdated,
                        "prompts_reset" => AuditEventType::PromptsReset,
                        "provider_test" => AuditEventType::ProviderTest,
                        "session_auto_committed" => AuditEventType::SessionAutoCommitted,
                        _ => AuditEventType::JobFailed,
                    },
                    session_id: row.get(2)?,
                    actor: row.get(3)?,
                    success: row.get::<_, i64>(4)? != 0,
                    details: details.and_then(|d| serde_json::from_str(&d).ok()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list audit entries")?;
        Ok(entries)
    }
}

/// Convenience wrapper turning domain events into audit rows.
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub fn log_settings_updated(&self, actor: Option<&str>, changed_keys: &[String]) -> Result<()> {
        let mut entry = AuditEntry::new(AuditEventType::SettingsUpdated)
            .with_details(serde_json::json!({ "changedKeys": changed_keys }));
        if let Some(actor) = actor {
            entry = entry.with_actor(actor);
        }
        self.store.append(entry)
    }

    pub fn log_prompts_reset(&self, actor: Option<&str>) -> Result<()> {
        let mut entry = AuditEntry::new(AuditEventType::PromptsReset);
        if let Some(actor) = actor {
            entry = entry.with_actor(actor);
        }
        self.store.append(entry)
    }

    /// Emitted on every provider connectivity probe, success and failure.
    pub fn log_provider_test(
        &self,
        actor: Option<&str>,
        provider: &str,
        success: bool,
        message: &str,
    ) -> Result<()> {
        let mut entry = AuditEntry::new(AuditEventType::ProviderTest)
            .with_success(success)
            .with_details(serde_json::json!({
                "provider": provider,
                "message": message,
            }));
        if let Some(actor) = actor {
            entry = entry.with_actor(actor);
        }
        self.store.append(entry)
    }

    pub fn log_job_failed(&self, session_id: &str, job_kind: &str, error: &str) -> Result<()> {
        self.store.append(
            AuditEntry::new(AuditEventType::JobFailed)
                .with_session(session_id)
                .with_success(false)
                .with_details(serde_json::json!({
                    "jobKind": job_kind,
                    "error": error,
                })),
        )
    }

    pub fn log_session_auto_committed(&self, session_id: &str, parts: usize) -> Result<()> {
        self.store.append(
            AuditEntry::new(AuditEventType::SessionAutoCommitted)
                .with_session(session_id)
                .with_details(serde_json::json!({ "partsCreated": parts })),
        )
    }
}
