//! Shared types for the vision provider layer.

use super::registry::ProviderId;
use std::time::Duration;
use thiserror::Error;

/// One page image attached to a vision request.
#[derive(Debug, Clone)]
pub struct VisionImage {
    /// MIME type of the encoded image (e.g. "image/png").
    pub mime_type: String,
    /// Base64-encoded image bytes, without a data-URL prefix.
    pub base64_data: String,
    /// Optional label shown to the model next to the image (e.g. "page 3").
    pub label: Option<String>,
}

/// A native PDF attachment, used only when the provider advertises
/// `supports_pdf_input` and the config enables full-PDF sends.
#[derive(Debug, Clone)]
pub struct PdfAttachment {
    pub base64_data: String,
    pub filename: Option<String>,
}

/// Requested shape of the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// Where a vision call should be sent: provider, model, resolved endpoint and
/// credential. Built by the configuration loader, consumed by the dispatcher.
#[derive(Debug, Clone)]
pub struct CallTarget {
    pub provider: ProviderId,
    pub model: String,
    /// Endpoint base with trailing slashes already stripped.
    pub endpoint: String,
    pub api_key: Option<String>,
}

/// Options for a single vision call.
#[derive(Debug, Clone)]
pub struct VisionCallOptions {
    /// System prompt, when the dialect supports one.
    pub system: Option<String>,
    pub response_format: ResponseFormat,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Opaque JSON object merged into the provider payload as-is.
    pub model_params: Option<serde_json::Value>,
    /// Native PDF attachments; ignored unless the provider supports them.
    pub documents: Vec<PdfAttachment>,
    /// Per-call deadline.
    pub timeout: Duration,
}

impl Default for VisionCallOptions {
    fn default() -> Self {
        Self {
            system: None,
            response_format: ResponseFormat::Text,
            max_tokens: 4096,
            temperature: 0.1,
            model_params: None,
            documents: Vec::new(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Token usage as reported by the provider, when reported at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

/// The textual result of a vision call.
#[derive(Debug, Clone)]
pub struct VisionResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// Errors surfaced by the provider dispatcher.
///
/// Retries are deliberately not performed here; the queue layer decides what
/// is retriable.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level failure: DNS, TLS, refused connection.
    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    /// The provider answered with an HTTP error. `detail` is a scrubbed,
    /// truncated snippet of the response body.
    #[error("Provider rejected request (status {status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// The provider answered 2xx but the body was not in the expected shape.
    #[error("Malformed provider response: {0}")]
    Malformed(String),

    /// The per-call deadline elapsed.
    #[error("Provider request timed out")]
    Timeout,

    /// The job-level cancellation signal fired mid-request.
    #[error("Provider request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Transient failures that the queue may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Unreachable(_) | ProviderError::Timeout)
            || matches!(self, ProviderError::Rejected { status, .. } if *status == 429 || *status >= 500)
    }
}

/// Cap applied to upstream error bodies before they are stored or returned.
const DETAIL_CAP: usize = 200;

/// Truncate an upstream body snippet and blank out any occurrence of the
/// credential that was used for the request.
pub(super) fn scrub_detail(body: &str, api_key: Option<&str>) -> String {
    let mut detail = body.trim().to_string();
    if let Some(key) = api_key {
        if !key.is_empty() {
            detail = detail.replace(key, "***");
        }
    }
    if detail.len() > DETAIL_CAP {
        let mut end = DETAIL_CAP;
        while !detail.is_char_boundary(end) {
            end -= 1;
        }
        detail.truncate(end);
        detail.push('…');
    }
    detail
}
