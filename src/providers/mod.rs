//! LLM provider layer: the static registry of supported providers and the
//! dispatcher that speaks each provider's wire dialect.

mod anthropic;
mod dispatcher;
mod gemini;
mod ollama;
mod openai;
pub mod registry;
mod types;

pub use dispatcher::{HttpVisionDispatcher, ProbeResult, VisionClient, PROBE_TIMEOUT};
pub use registry::{AuthScheme, ProviderId, ProviderMeta, WireDialect};
pub use types::{
    CallTarget, PdfAttachment, ProviderError, ResponseFormat, TokenUsage, VisionCallOptions,
    VisionImage, VisionResponse,
};
