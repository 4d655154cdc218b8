//! Fermata Server Library
//!
//! Ingestion backend of a sheet-music library: uploaded PDFs are analyzed,
//! segmented into per-instrument parts, split, stored, and routed through
//! one of three autonomy tiers (auto-commit, human-reviewed, manual).

pub mod audit;
pub mod config;
pub mod pdf;
pub mod prompts;
pub mod providers;
pub mod queue;
pub mod server;
pub mod settings;
pub mod smart_upload;
pub mod sqlite_persistence;
pub mod storage;

// Re-export commonly used types for convenience
pub use server::{build_router, run_server, ServerState};
pub use settings::{RuntimeConfig, SettingsStore, SqliteSettingsStore};
pub use smart_upload::{SessionStore, SmartUploadProcessor, SqliteSessionStore};
