//! Object storage for originals and split parts.
//!
//! The pipeline talks to storage through the narrow `ObjectStore` trait;
//! the bundled implementation keeps objects on the local filesystem with a
//! JSON sidecar for metadata.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Free-form metadata attached to a stored object.
pub type ObjectMeta = HashMap<String, String>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key, overwriting any previous object.
    async fn put_object(&self, key: &str, bytes: &[u8], meta: &ObjectMeta) -> Result<()>;

    /// Fetch an object's bytes. Errors when the key does not exist.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove an object; removing a missing key is not an error.
    async fn delete_object(&self, key: &str) -> Result<()>;
}

/// Filesystem-backed object store rooted at a directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create storage root {:?}", self.root))?;
        Ok(())
    }

    /// Keys are slash-separated paths under the root. Reject anything that
    /// could escape it.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|s| s == ".." || s.is_empty())
        {
            bail!("Invalid storage key: {}", key);
        }
        Ok(self.root.join(key))
    }

    fn meta_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(".meta.json");
        PathBuf::from(os)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object(&self, key: &str, bytes: &[u8], meta: &ObjectMeta) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create parent for {:?}", path))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write object {}", key))?;
        if !meta.is_empty() {
            let meta_json = serde_json::to_vec(meta)?;
            tokio::fs::write(Self::meta_path(&path), meta_json)
                .await
                .with_context(|| format!("Failed to write metadata for {}", key))?;
        }
        debug!(key, bytes = bytes.len(), "Stored object");
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read object {}", key))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to delete object {}", key)),
        }
        let _ = tokio::fs::remove_file(Self::meta_path(&path)).await;
        Ok(())
    }
}
