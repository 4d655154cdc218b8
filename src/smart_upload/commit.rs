//! The terminal commit step, performed by an external collaborator.

use super::models::UploadSession;
use async_trait::async_trait;
use tracing::info;

/// Creates music-library records from a session's parsed parts. The library
/// side of this call lives outside this crate.
#[async_trait]
pub trait LibraryCommitter: Send + Sync {
    async fn commit_session(&self, session: &UploadSession) -> anyhow::Result<()>;
}

/// Placeholder committer for deployments where the library integration is
/// not wired up; logs the commit and succeeds so sessions still settle.
pub struct LoggingCommitter;

#[async_trait]
impl LibraryCommitter for LoggingCommitter {
    async fn commit_session(&self, session: &UploadSession) -> anyhow::Result<()> {
        info!(
            session_id = %session.id,
            parts = session.parsed_parts.len(),
            "Committing session to library"
        );
        Ok(())
    }
}
