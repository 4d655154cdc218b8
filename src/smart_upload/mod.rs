//! The smart upload pipeline: session model, deterministic analysis,
//! quality gating, and the background processor that ties them together.

mod budget;
mod commit;
mod extract;
pub mod instruments;
mod models;
mod processor;
mod progress;
mod quality;
mod sampling;
mod schema;
mod second_pass;
mod segmentation;
mod session_store;
mod validator;

pub use budget::{BudgetExhausted, SessionBudget};
pub use commit::{LibraryCommitter, LoggingCommitter};
pub use extract::{fallback_metadata, parse_header_labels, parse_metadata};
pub use models::{
    original_storage_key, part_storage_key, slugify, truncate_first_pass_raw, CuttingInstruction,
    ExtractedMetadata, LlmProvenance, ParseStatus, ParsedPart, ProgressEvent, ProgressStep,
    RoutingDecision, SecondPassStatus, UploadSession, FIRST_PASS_RAW_CAP,
};
pub use processor::SmartUploadProcessor;
pub use progress::ProgressBus;
pub use quality::{evaluate as evaluate_quality_gates, GateOutcome, QualityInput};
pub use sampling::{sample_pages, MAX_SAMPLED_PAGES};
pub use segmentation::{segment, PageHeader, SegmentationResult};
pub use session_store::{SessionStore, SqliteSessionStore};
pub use validator::{validate, ValidateOptions, ValidationOutcome};
