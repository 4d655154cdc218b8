//! The vision model dispatcher.
//!
//! One logical operation: serialize the request in the provider's dialect,
//! attach auth, POST, extract the textual reply. Retries are a queue-layer
//! concern and are never performed here.

use super::registry::{
    build_auth_headers, chat_endpoint, gemini_generate_endpoint, get_meta, models_probe_endpoint,
    models_probe_fallback, ProviderId, WireDialect,
};
use super::types::{
    scrub_detail, CallTarget, ProviderError, VisionCallOptions, VisionImage, VisionResponse,
};
use super::{anthropic, gemini, ollama, openai};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Deadline for connectivity probes; model inference uses the per-call
/// timeout from [`VisionCallOptions`].
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a models-listing probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    /// Number of models the endpoint listed, when the body was parseable.
    pub model_count: Option<usize>,
}

/// Abstraction over the vision call so the processor can be driven by a
/// scripted fake in tests.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Send one vision request and return the textual reply.
    async fn call_vision_model(
        &self,
        target: &CallTarget,
        images: &[VisionImage],
        user_prompt: &str,
        opts: &VisionCallOptions,
        cancel: &CancellationToken,
    ) -> Result<VisionResponse, ProviderError>;

    /// GET the provider's models listing to verify connectivity and
    /// credentials. Never persists anything.
    async fn probe_models(
        &self,
        provider: ProviderId,
        endpoint: &str,
        api_key: Option<&str>,
    ) -> Result<ProbeResult, ProviderError>;
}

/// Production dispatcher speaking HTTP via reqwest.
pub struct HttpVisionDispatcher {
    client: Client,
}

impl HttpVisionDispatcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpVisionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge opaque model params into the top level of the payload, overriding on
/// key collision.
fn merge_model_params(body: &mut serde_json::Value, params: Option<&serde_json::Value>) {
    let (Some(obj), Some(serde_json::Value::Object(extra))) = (body.as_object_mut(), params)
    else {
        return;
    };
    for (key, value) in extra {
        obj.insert(key.clone(), value.clone());
    }
}

fn build_body(
    target: &CallTarget,
    images: &[VisionImage],
    user_prompt: &str,
    opts: &VisionCallOptions,
) -> Result<serde_json::Value, ProviderError> {
    let meta = get_meta(target.provider);

    // Native attachments only reach the wire when the provider understands
    // them; the processor gates on this too, this is the backstop.
    let mut opts = opts.clone();
    if !meta.supports_pdf_input {
        opts.documents.clear();
    }

    let mut body = match meta.dialect {
        WireDialect::OpenaiCompat => openai::build_body(&target.model, images, user_prompt, &opts),
        WireDialect::AnthropicNative => {
            anthropic::build_body(&target.model, images, user_prompt, &opts)
        }
        WireDialect::GeminiNative => gemini::build_body(images, user_prompt, &opts),
        WireDialect::OllamaNative => ollama::build_body(&target.model, images, user_prompt, &opts),
    }?;

    merge_model_params(&mut body, opts.model_params.as_ref());
    Ok(body)
}

fn request_url(target: &CallTarget) -> String {
    match get_meta(target.provider).dialect {
        WireDialect::GeminiNative => gemini_generate_endpoint(
            &target.endpoint,
            &target.model,
            target.api_key.as_deref().unwrap_or_default(),
        ),
        _ => chat_endpoint(target.provider, &target.endpoint),
    }
}

fn parse_body(dialect: WireDialect, body: &[u8]) -> Result<VisionResponse, ProviderError> {
    match dialect {
        WireDialect::OpenaiCompat => openai::parse_response(body),
        WireDialect::AnthropicNative => anthropic::parse_response(body),
        WireDialect::GeminiNative => gemini::parse_response(body),
        WireDialect::OllamaNative => ollama::parse_response(body),
    }
}

fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        // reqwest error strings never include request headers, so no
        // credential can leak through here.
        ProviderError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl VisionClient for HttpVisionDispatcher {
    async fn call_vision_model(
        &self,
        target: &CallTarget,
        images: &[VisionImage],
        user_prompt: &str,
        opts: &VisionCallOptions,
        cancel: &CancellationToken,
    ) -> Result<VisionResponse, ProviderError> {
        let meta = get_meta(target.provider);
        let body = build_body(target, images, user_prompt, opts)?;
        let url = request_url(target);

        debug!(
            provider = %target.provider,
            model = %target.model,
            image_count = images.len(),
            document_count = opts.documents.len(),
            "Sending vision request"
        );

        let mut request = self
            .client
            .post(&url)
            .json(&body)
            .timeout(opts.timeout);
        for (name, value) in build_auth_headers(target.provider, target.api_key.as_deref()) {
            request = request.header(name, value);
        }

        let response = tokio::select! {
            result = request.send() => result.map_err(map_send_error)?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let status = response.status();
        let bytes = tokio::select! {
            result = response.bytes() => result.map_err(map_send_error)?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        if !status.is_success() {
            let snippet = String::from_utf8_lossy(&bytes);
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                detail: scrub_detail(&snippet, target.api_key.as_deref()),
            });
        }

        parse_body(meta.dialect, &bytes)
    }

    async fn probe_models(
        &self,
        provider: ProviderId,
        endpoint: &str,
        api_key: Option<&str>,
    ) -> Result<ProbeResult, ProviderError> {
        let url = models_probe_endpoint(provider, endpoint, api_key);
        match self.probe_one(provider, &url, api_key).await {
            Ok(result) => Ok(result),
            Err(first_err) => {
                // Older Ollama builds only expose one of the two listing
                // surfaces; try the compatible one before giving up.
                if let Some(fallback_url) = models_probe_fallback(provider, endpoint) {
                    warn!(provider = %provider, error = %first_err, "Primary probe failed, trying fallback");
                    self.probe_one(provider, &fallback_url, api_key).await
                } else {
                    Err(first_err)
                }
            }
        }
    }
}

impl HttpVisionDispatcher {
    async fn probe_one(
        &self,
        provider: ProviderId,
        url: &str,
        api_key: Option<&str>,
    ) -> Result<ProbeResult, ProviderError> {
        let mut request = self.client.get(url).timeout(PROBE_TIMEOUT);
        for (name, value) in build_auth_headers(provider, api_key) {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_send_error)?;

        if !status.is_success() {
            let snippet = String::from_utf8_lossy(&bytes);
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                detail: scrub_detail(&snippet, api_key),
            });
        }

        Ok(ProbeResult {
            model_count: count_listed_models(&bytes),
        })
    }
}

/// Best-effort model count from a listing body. Understands the OpenAI
/// `{"data": [...]}` shape, Ollama's `{"models": [...]}`, and a bare array.
fn count_listed_models(body: &[u8]) -> Option<usize> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    if let Some(data) = value.get("data").and_then(|v| v.as_array()) {
        return Some(data.len());
    }
    if let Some(models) = value.get("models").and_then(|v| v.as_array()) {
        return Some(models.len());
    }
    value.as_array().map(|a| a.len())
}
