//! Settings storage and persistence.
//!
//! SQLite-backed key/value store for the smart upload configuration. Values
//! are stored in plaintext; masking is an API-layer concern.

use super::schema::SETTINGS_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned_database;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One stored setting, as returned to the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct SettingRecord {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "updatedBy")]
    pub updated_by: Option<String>,
}

/// Trait for settings storage operations.
pub trait SettingsStore: Send + Sync {
    /// All stored settings, ordered by key.
    fn get_all(&self) -> Result<Vec<SettingRecord>>;

    /// One setting by key.
    fn get(&self, key: &str) -> Result<Option<SettingRecord>>;

    /// Plaintext value of one key, when present.
    fn get_value(&self, key: &str) -> Result<Option<String>>;

    /// All stored key/value pairs as a map.
    fn get_value_map(&self) -> Result<HashMap<String, String>>;

    /// Upsert the given pairs in a single transaction.
    fn upsert_many(&self, entries: &[(String, String)], updated_by: Option<&str>) -> Result<()>;
}

pub struct SqliteSettingsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSettingsStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_database(db_path, SETTINGS_VERSIONED_SCHEMAS, "settings")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        SETTINGS_VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<SettingRecord> {
        let updated_at: i64 = row.get("updated_at")?;
        Ok(SettingRecord {
            id: row.get("id")?,
            key: row.get("key")?,
            value: row.get("value")?,
            description: row.get("description")?,
            updated_at: Utc
                .timestamp_opt(updated_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
            updated_by: row.get("updated_by")?,
        })
    }
}

impl SettingsStore for SqliteSettingsStore {
    fn get_all(&self) -> Result<Vec<SettingRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT rowid AS id, key, value, description, updated_at, updated_by
             FROM smart_upload_settings ORDER BY key",
        )?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read settings")?;
        Ok(records)
    }

    fn get(&self, key: &str) -> Result<Option<SettingRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT rowid AS id, key, value, description, updated_at, updated_by
                 FROM smart_upload_settings WHERE key = ?1",
                params![key],
                Self::row_to_record,
            )
            .optional()
            .with_context(|| format!("Failed to read setting {}", key))?;
        Ok(record)
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM smart_upload_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read setting {}", key))?;
        Ok(value)
    }

    fn get_value_map(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value FROM smart_upload_settings")?;
        let map = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()
            .context("Failed to read settings map")?;
        Ok(map)
    }

    fn upsert_many(&self, entries: &[(String, String)], updated_by: Option<&str>) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().timestamp();
        for (key, value) in entries {
            let description = super::keys::spec_for(key).map(|spec| spec.description);
            tx.execute(
                "INSERT INTO smart_upload_settings (key, value, description, updated_at, updated_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at,
                     updated_by = excluded.updated_by",
                params![key, value, description, now, updated_by],
            )
            .with_context(|| format!("Failed to upsert setting {}", key))?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::keys;

    fn store() -> SqliteSettingsStore {
        SqliteSettingsStore::in_memory().unwrap()
    }

    #[test]
    fn upsert_then_get_roundtrips() {
        let store = store();
        store
            .upsert_many(
                &[(keys::LLM_PROVIDER.to_string(), "openai".to_string())],
                Some("admin"),
            )
            .unwrap();

        let record = store.get(keys::LLM_PROVIDER).unwrap().unwrap();
        assert_eq!(record.value, "openai");
        assert_eq!(record.updated_by.as_deref(), Some("admin"));
        assert!(record.description.is_some());
    }

    #[test]
    fn upsert_overwrites_existing_value() {
        let store = store();
        store
            .upsert_many(&[(keys::LLM_PROVIDER.to_string(), "openai".to_string())], None)
            .unwrap();
        store
            .upsert_many(&[(keys::LLM_PROVIDER.to_string(), "gemini".to_string())], None)
            .unwrap();

        assert_eq!(
            store.get_value(keys::LLM_PROVIDER).unwrap().as_deref(),
            Some("gemini")
        );
        assert_eq!(store.get_all().unwrap().len(), 1);
    }

    #[test]
    fn get_all_is_ordered_by_key() {
        let store = store();
        store
            .upsert_many(
                &[
                    ("z_key".to_string(), "1".to_string()),
                    ("a_key".to_string(), "2".to_string()),
                ],
                None,
            )
            .unwrap();
        let keys: Vec<String> = store.get_all().unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["a_key", "z_key"]);
    }
}
