//! Background job queue for the smart upload pipeline.

mod models;
mod retry_policy;
mod schema;
mod store;
mod worker;

pub use models::{Job, JobError, JobKind, JobStatus, DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY};
pub use retry_policy::RetryPolicy;
pub use store::{JobStore, SqliteJobStore, KEEP_COMPLETED, KEEP_FAILED};
pub use worker::{JobHandler, JobQueue, DEFAULT_CONCURRENCY};
