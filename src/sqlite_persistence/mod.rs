mod versioned_schema;

pub use versioned_schema::{
    Column, SqlType, Table, VersionedSchema, BASE_DB_VERSION, DEFAULT_TIMESTAMP,
};

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

/// Open a database file, creating it with the latest schema when new and
/// validating (and migrating, when declared) an existing one.
///
/// Every store in the crate goes through here so the version bookkeeping is
/// written once.
pub fn open_versioned_database<P: AsRef<Path>>(
    db_path: P,
    schemas: &[VersionedSchema],
    label: &str,
) -> Result<Connection> {
    let path = db_path.as_ref();
    let is_new_db = !path.exists();

    let mut conn = Connection::open(path)
        .with_context(|| format!("Failed to open {} database at {:?}", label, path))?;
    conn.execute("PRAGMA foreign_keys = ON;", [])?;

    let latest = schemas
        .last()
        .expect("at least one versioned schema must be declared");

    if is_new_db {
        info!("Creating new {} database at {:?}", label, path);
        latest.create(&conn)?;
        return Ok(conn);
    }

    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let db_version = raw_version - BASE_DB_VERSION as i64;
    if db_version < 1 {
        bail!(
            "{} database version {} is invalid (expected >= 1)",
            label,
            db_version
        );
    }

    let schema = schemas
        .iter()
        .find(|s| s.version == db_version as usize)
        .with_context(|| format!("Unknown {} database version {}", label, db_version))?;
    schema.validate(&conn).with_context(|| {
        format!(
            "{} database schema validation failed for version {}",
            label, db_version
        )
    })?;

    if (db_version as usize) < latest.version {
        info!(
            "Migrating {} database from version {} to {}",
            label, db_version, latest.version
        );
        migrate(&mut conn, schemas, db_version as usize, label)?;
    }

    Ok(conn)
}

fn migrate(
    conn: &mut Connection,
    schemas: &[VersionedSchema],
    from_version: usize,
    label: &str,
) -> Result<()> {
    let tx = conn.transaction()?;
    let mut latest_applied = from_version;
    for schema in schemas.iter().filter(|s| s.version > from_version) {
        info!(
            "Running {} database migration from version {} to {}",
            label, latest_applied, schema.version
        );
        if let Some(migration_fn) = schema.migration {
            migration_fn(&tx).with_context(|| {
                format!("Failed to run migration to version {}", schema.version)
            })?;
        }
        latest_applied = schema.version;
    }
    tx.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_applied),
        [],
    )?;
    tx.commit()?;
    Ok(())
}
