//! Smart upload configuration: the persistent settings store, the closed key
//! set, and the runtime config loader.

pub mod keys;
mod loader;
mod schema;
mod store;

pub use loader::{
    masked_value, merge_updates, resolve_endpoint, ConfigError, FieldViolation, MergeOutcome,
    RuntimeConfig,
};
pub use store::{SettingRecord, SettingsStore, SqliteSettingsStore};
