//! Process-level configuration: ports, directories, worker counts, and the
//! static auth token table. Runtime pipeline settings live in the settings
//! store, not here.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// HTTP port.
    pub port: u16,
    /// Directory for the SQLite database files.
    pub db_dir: PathBuf,
    /// Root of the filesystem object store.
    pub storage_dir: PathBuf,
    /// Smart upload queue worker count.
    pub worker_concurrency: usize,
    /// Static auth token table (see `SessionAuthenticator`).
    pub auth_tokens: Vec<AuthTokenEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthTokenEntry {
    pub token: String,
    pub user_id: String,
    /// Permission names: "manage_system_config", "manage_uploads".
    pub permissions: Vec<String>,
    pub csrf_token: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            db_dir: PathBuf::from("data"),
            storage_dir: PathBuf::from("storage"),
            worker_concurrency: crate::queue::DEFAULT_CONCURRENCY,
            auth_tokens: Vec::new(),
        }
    }
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {:?}", path.as_ref()))
    }
}
