//! Static table of supported LLM providers and their wire characteristics.
//!
//! Adding a provider means one new `ProviderId` variant plus its row in
//! `PROVIDER_TABLE`; the dispatcher routes on the wire dialect, not the
//! provider, so most additions need no new request code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a supported provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderId {
    Ollama,
    Openai,
    Anthropic,
    Gemini,
    Openrouter,
    Mistral,
    Groq,
    OllamaCloud,
    Custom,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Ollama => "ollama",
            ProviderId::Openai => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Gemini => "gemini",
            ProviderId::Openrouter => "openrouter",
            ProviderId::Mistral => "mistral",
            ProviderId::Groq => "groq",
            ProviderId::OllamaCloud => "ollama-cloud",
            ProviderId::Custom => "custom",
        }
    }

    pub fn all() -> &'static [ProviderId] {
        &[
            ProviderId::Ollama,
            ProviderId::Openai,
            ProviderId::Anthropic,
            ProviderId::Gemini,
            ProviderId::Openrouter,
            ProviderId::Mistral,
            ProviderId::Groq,
            ProviderId::OllamaCloud,
            ProviderId::Custom,
        ]
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderId::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or(())
    }
}

/// Request/response shape spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDialect {
    /// OpenAI chat completions, also spoken by OpenRouter, Mistral, Groq,
    /// Ollama's cloud `/v1` surface, and user-supplied compatible servers.
    OpenaiCompat,
    /// Anthropic `/v1/messages`.
    AnthropicNative,
    /// Gemini `generateContent`.
    GeminiNative,
    /// Self-hosted Ollama `/api/chat`.
    OllamaNative,
}

/// How the credential is attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// No authentication (local servers).
    None,
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// `x-api-key: <key>` plus `anthropic-version`.
    XApiKey,
    /// Key passed as a `?key=` query parameter.
    QueryParam,
}

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Static capabilities of one provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderMeta {
    pub id: ProviderId,
    pub dialect: WireDialect,
    /// Default endpoint base; empty for `custom`, which has no default.
    pub default_endpoint: &'static str,
    pub requires_api_key: bool,
    /// Whether the provider accepts a raw PDF as a native attachment.
    pub supports_pdf_input: bool,
    pub auth: AuthScheme,
}

const PROVIDER_TABLE: &[ProviderMeta] = &[
    ProviderMeta {
        id: ProviderId::Ollama,
        dialect: WireDialect::OllamaNative,
        default_endpoint: "http://localhost:11434",
        requires_api_key: false,
        supports_pdf_input: false,
        auth: AuthScheme::None,
    },
    ProviderMeta {
        id: ProviderId::Openai,
        dialect: WireDialect::OpenaiCompat,
        default_endpoint: "https://api.openai.com/v1",
        requires_api_key: true,
        supports_pdf_input: false,
        auth: AuthScheme::Bearer,
    },
    ProviderMeta {
        id: ProviderId::Anthropic,
        dialect: WireDialect::AnthropicNative,
        default_endpoint: "https://api.anthropic.com",
        requires_api_key: true,
        supports_pdf_input: true,
        auth: AuthScheme::XApiKey,
    },
    ProviderMeta {
        id: ProviderId::Gemini,
        dialect: WireDialect::GeminiNative,
        default_endpoint: "https://generativelanguage.googleapis.com/v1beta",
        requires_api_key: true,
        supports_pdf_input: true,
        auth: AuthScheme::QueryParam,
    },
    ProviderMeta {
        id: ProviderId::Openrouter,
        dialect: WireDialect::OpenaiCompat,
        default_endpoint: "https://openrouter.ai/api/v1",
        requires_api_key: true,
        supports_pdf_input: false,
        auth: AuthScheme::Bearer,
    },
    ProviderMeta {
        id: ProviderId::Mistral,
        dialect: WireDialect::OpenaiCompat,
        default_endpoint: "https://api.mistral.ai/v1",
        requires_api_key: true,
        supports_pdf_input: false,
        auth: AuthScheme::Bearer,
    },
    ProviderMeta {
        id: ProviderId::Groq,
        dialect: WireDialect::OpenaiCompat,
        default_endpoint: "https://api.groq.com/openai/v1",
        requires_api_key: true,
        supports_pdf_input: false,
        auth: AuthScheme::Bearer,
    },
    ProviderMeta {
        id: ProviderId::OllamaCloud,
        dialect: WireDialect::OpenaiCompat,
        default_endpoint: "https://ollama.com/v1",
        requires_api_key: true,
        supports_pdf_input: false,
        auth: AuthScheme::Bearer,
    },
    ProviderMeta {
        id: ProviderId::Custom,
        dialect: WireDialect::OpenaiCompat,
        default_endpoint: "",
        requires_api_key: false,
        supports_pdf_input: false,
        auth: AuthScheme::Bearer,
    },
];

/// Look up a provider's static metadata.
pub fn get_meta(provider: ProviderId) -> &'static ProviderMeta {
    PROVIDER_TABLE
        .iter()
        .find(|m| m.id == provider)
        .expect("every ProviderId has a table row")
}

/// Resolve a provider name from the settings store.
pub fn get_meta_by_name(name: &str) -> Option<&'static ProviderMeta> {
    name.parse::<ProviderId>().ok().map(get_meta)
}

/// Default endpoint base for a provider.
pub fn default_endpoint(provider: ProviderId) -> &'static str {
    get_meta(provider).default_endpoint
}

/// Headers to attach for the provider's auth scheme. Query-parameter auth
/// (Gemini) attaches nothing here; its key rides on the URL.
pub fn build_auth_headers(provider: ProviderId, api_key: Option<&str>) -> Vec<(String, String)> {
    let meta = get_meta(provider);
    let key = match api_key {
        Some(k) if !k.is_empty() => k,
        _ => return Vec::new(),
    };
    match meta.auth {
        AuthScheme::None | AuthScheme::QueryParam => Vec::new(),
        AuthScheme::Bearer => vec![("Authorization".to_string(), format!("Bearer {}", key))],
        AuthScheme::XApiKey => vec![
            ("x-api-key".to_string(), key.to_string()),
            (
                "anthropic-version".to_string(),
                ANTHROPIC_VERSION.to_string(),
            ),
        ],
    }
}

/// Chat/completions URL for a provider on a given endpoint base.
///
/// Gemini is the odd one out: its URL embeds the model and key, so the
/// dispatcher builds it via [`gemini_generate_endpoint`] instead.
pub fn chat_endpoint(provider: ProviderId, base: &str) -> String {
    let base = base.trim_end_matches('/');
    match get_meta(provider).dialect {
        WireDialect::OllamaNative => format!("{}/api/chat", base),
        WireDialect::AnthropicNative => format!("{}/v1/messages", base),
        WireDialect::OpenaiCompat => format!("{}/chat/completions", base),
        WireDialect::GeminiNative => format!("{}/models", base),
    }
}

/// Gemini `generateContent` URL with the key as a query parameter.
pub fn gemini_generate_endpoint(base: &str, model: &str, api_key: &str) -> String {
    format!(
        "{}/models/{}:generateContent?key={}",
        base.trim_end_matches('/'),
        model,
        api_key
    )
}

/// URL probed by the settings test endpoint to list available models.
pub fn models_probe_endpoint(provider: ProviderId, base: &str, api_key: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    match provider {
        ProviderId::Ollama => format!("{}/api/tags", base),
        ProviderId::Anthropic => format!("{}/v1/models", base),
        ProviderId::Gemini => format!("{}/models?key={}", base, api_key.unwrap_or_default()),
        _ => format!("{}/models", base),
    }
}

/// Fallback probe URL for providers that expose more than one listing
/// surface. Currently only self-hosted Ollama, whose newer builds also serve
/// an OpenAI-compatible `/v1/models`.
pub fn models_probe_fallback(provider: ProviderId, base: &str) -> Option<String> {
    match provider {
        ProviderId::Ollama => Some(format!("{}/v1/models", base.trim_end_matches('/'))),
        _ => None,
    }
}
