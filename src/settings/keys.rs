//! The closed set of smart-upload setting keys.
//!
//! Unknown keys are skipped (never rejected) on write, so the set can grow
//! without breaking older admin UIs. Secret keys carry a two-value masking
//! protocol at the API boundary: `__SET__` preserves the stored value,
//! `__UNSET__` or an empty string clears it. The loader always reads
//! plaintext.

use crate::prompts;
use crate::providers::ProviderId;

pub const SECRET_SET: &str = "__SET__";
pub const SECRET_UNSET: &str = "__UNSET__";

// Provider / model selection
pub const LLM_PROVIDER: &str = "llm_provider";
pub const LLM_VISION_MODEL: &str = "llm_vision_model";
pub const LLM_VERIFICATION_MODEL: &str = "llm_verification_model";

// Prompts
pub const LLM_VISION_SYSTEM_PROMPT: &str = "llm_vision_system_prompt";
pub const LLM_VERIFICATION_SYSTEM_PROMPT: &str = "llm_verification_system_prompt";
pub const LLM_HEADER_LABEL_PROMPT: &str = "llm_header_label_prompt";
pub const LLM_PROMPT_VERSION: &str = "llm_prompt_version";

// Credentials (secret)
pub const LLM_OPENAI_API_KEY: &str = "llm_openai_api_key";
pub const LLM_ANTHROPIC_API_KEY: &str = "llm_anthropic_api_key";
pub const LLM_OPENROUTER_API_KEY: &str = "llm_openrouter_api_key";
pub const LLM_GEMINI_API_KEY: &str = "llm_gemini_api_key";
pub const LLM_MISTRAL_API_KEY: &str = "llm_mistral_api_key";
pub const LLM_GROQ_API_KEY: &str = "llm_groq_api_key";
pub const LLM_OLLAMA_CLOUD_API_KEY: &str = "llm_ollama_cloud_api_key";
pub const LLM_CUSTOM_API_KEY: &str = "llm_custom_api_key";

// Endpoints
pub const LLM_OLLAMA_ENDPOINT: &str = "llm_ollama_endpoint";
pub const LLM_CUSTOM_BASE_URL: &str = "llm_custom_base_url";

// Pipeline behavior
pub const LLM_CONFIDENCE_THRESHOLD: &str = "llm_confidence_threshold";
pub const LLM_TWO_PASS_ENABLED: &str = "llm_two_pass_enabled";
pub const SMART_UPLOAD_CONFIDENCE_THRESHOLD: &str = "smart_upload_confidence_threshold";
pub const SMART_UPLOAD_AUTO_APPROVE_THRESHOLD: &str = "smart_upload_auto_approve_threshold";
pub const SMART_UPLOAD_AUTONOMOUS_APPROVAL_THRESHOLD: &str =
    "smart_upload_autonomous_approval_threshold";
pub const SMART_UPLOAD_ENABLE_FULLY_AUTONOMOUS_MODE: &str =
    "smart_upload_enable_fully_autonomous_mode";
pub const SMART_UPLOAD_SEND_FULL_PDF_TO_LLM: &str = "smart_upload_send_full_pdf_to_llm";
pub const SMART_UPLOAD_MAX_PAGES_PER_PART: &str = "smart_upload_max_pages_per_part";
pub const SMART_UPLOAD_ALLOWED_MIME_TYPES: &str = "smart_upload_allowed_mime_types";
pub const SMART_UPLOAD_MAX_FILE_SIZE_MB: &str = "smart_upload_max_file_size_mb";

// Budgets
pub const SMART_UPLOAD_BUDGET_MAX_LLM_CALLS_PER_SESSION: &str =
    "smart_upload_budget_max_llm_calls_per_session";
pub const SMART_UPLOAD_BUDGET_MAX_INPUT_TOKENS_PER_SESSION: &str =
    "smart_upload_budget_max_input_tokens_per_session";

// Model params (opaque JSON objects)
pub const VISION_MODEL_PARAMS: &str = "vision_model_params";
pub const VERIFICATION_MODEL_PARAMS: &str = "verification_model_params";

/// Description + hardcoded default for one key.
pub struct KeySpec {
    pub key: &'static str,
    pub description: &'static str,
    pub default: &'static str,
}

pub const KEY_SPECS: &[KeySpec] = &[
    KeySpec {
        key: LLM_PROVIDER,
        description: "LLM provider used for vision analysis",
        default: "ollama",
    },
    KeySpec {
        key: LLM_VISION_MODEL,
        description: "Model for the primary vision pass",
        default: "llava",
    },
    KeySpec {
        key: LLM_VERIFICATION_MODEL,
        description: "Smaller model for verification and header labeling",
        default: "llava",
    },
    KeySpec {
        key: LLM_VISION_SYSTEM_PROMPT,
        description: "System prompt for the primary vision pass",
        default: "",
    },
    KeySpec {
        key: LLM_VERIFICATION_SYSTEM_PROMPT,
        description: "System prompt for the verification pass",
        default: "",
    },
    KeySpec {
        key: LLM_HEADER_LABEL_PROMPT,
        description: "System prompt for header-crop labeling",
        default: "",
    },
    KeySpec {
        key: LLM_PROMPT_VERSION,
        description: "Prompt revision tag recorded with every session",
        default: prompts::DEFAULT_PROMPT_VERSION,
    },
    KeySpec {
        key: LLM_OPENAI_API_KEY,
        description: "OpenAI API key",
        default: "",
    },
    KeySpec {
        key: LLM_ANTHROPIC_API_KEY,
        description: "Anthropic API key",
        default: "",
    },
    KeySpec {
        key: LLM_OPENROUTER_API_KEY,
        description: "OpenRouter API key",
        default: "",
    },
    KeySpec {
        key: LLM_GEMINI_API_KEY,
        description: "Gemini API key",
        default: "",
    },
    KeySpec {
        key: LLM_MISTRAL_API_KEY,
        description: "Mistral API key",
        default: "",
    },
    KeySpec {
        key: LLM_GROQ_API_KEY,
        description: "Groq API key",
        default: "",
    },
    KeySpec {
        key: LLM_OLLAMA_CLOUD_API_KEY,
        description: "Ollama Cloud API key",
        default: "",
    },
    KeySpec {
        key: LLM_CUSTOM_API_KEY,
        description: "API key for the custom endpoint",
        default: "",
    },
    KeySpec {
        key: LLM_OLLAMA_ENDPOINT,
        description: "Self-hosted Ollama endpoint",
        default: "",
    },
    KeySpec {
        key: LLM_CUSTOM_BASE_URL,
        description: "Base URL of a custom OpenAI-compatible server",
        default: "",
    },
    KeySpec {
        key: LLM_CONFIDENCE_THRESHOLD,
        description: "Legacy alias for smart_upload_confidence_threshold",
        default: "",
    },
    KeySpec {
        key: LLM_TWO_PASS_ENABLED,
        description: "Whether low-confidence sessions get a second pass",
        default: "true",
    },
    KeySpec {
        key: SMART_UPLOAD_CONFIDENCE_THRESHOLD,
        description: "Below this confidence, parsing is not trusted at all",
        default: "70",
    },
    KeySpec {
        key: SMART_UPLOAD_AUTO_APPROVE_THRESHOLD,
        description: "At or above this confidence, parses skip the second pass",
        default: "90",
    },
    KeySpec {
        key: SMART_UPLOAD_AUTONOMOUS_APPROVAL_THRESHOLD,
        description: "Minimum final confidence for autonomous commit",
        default: "95",
    },
    KeySpec {
        key: SMART_UPLOAD_ENABLE_FULLY_AUTONOMOUS_MODE,
        description: "Allow sessions to commit without human review",
        default: "false",
    },
    KeySpec {
        key: SMART_UPLOAD_SEND_FULL_PDF_TO_LLM,
        description: "Attach the raw PDF when the provider supports it",
        default: "false",
    },
    KeySpec {
        key: SMART_UPLOAD_MAX_PAGES_PER_PART,
        description: "Quality gate: maximum page count of one part",
        default: "40",
    },
    KeySpec {
        key: SMART_UPLOAD_ALLOWED_MIME_TYPES,
        description: "JSON array of accepted upload MIME types",
        default: r#"["application/pdf"]"#,
    },
    KeySpec {
        key: SMART_UPLOAD_MAX_FILE_SIZE_MB,
        description: "Maximum accepted upload size in MiB",
        default: "100",
    },
    KeySpec {
        key: SMART_UPLOAD_BUDGET_MAX_LLM_CALLS_PER_SESSION,
        description: "Per-session cap on LLM calls",
        default: "20",
    },
    KeySpec {
        key: SMART_UPLOAD_BUDGET_MAX_INPUT_TOKENS_PER_SESSION,
        description: "Per-session cap on counted input tokens",
        default: "500000",
    },
    KeySpec {
        key: VISION_MODEL_PARAMS,
        description: "JSON object merged into vision requests",
        default: "{}",
    },
    KeySpec {
        key: VERIFICATION_MODEL_PARAMS,
        description: "JSON object merged into verification requests",
        default: "{}",
    },
];

pub const SECRET_KEYS: &[&str] = &[
    LLM_OPENAI_API_KEY,
    LLM_ANTHROPIC_API_KEY,
    LLM_OPENROUTER_API_KEY,
    LLM_GEMINI_API_KEY,
    LLM_MISTRAL_API_KEY,
    LLM_GROQ_API_KEY,
    LLM_OLLAMA_CLOUD_API_KEY,
    LLM_CUSTOM_API_KEY,
];

/// The keys restored by the reset-prompts endpoint.
pub const PROMPT_KEYS: &[&str] = &[
    LLM_VISION_SYSTEM_PROMPT,
    LLM_VERIFICATION_SYSTEM_PROMPT,
    LLM_PROMPT_VERSION,
];

pub fn is_recognized(key: &str) -> bool {
    KEY_SPECS.iter().any(|spec| spec.key == key)
}

pub fn is_secret(key: &str) -> bool {
    SECRET_KEYS.contains(&key)
}

pub fn spec_for(key: &str) -> Option<&'static KeySpec> {
    KEY_SPECS.iter().find(|spec| spec.key == key)
}

/// Hardcoded default for a key; empty string when the key has no default.
pub fn default_value(key: &str) -> &'static str {
    spec_for(key).map(|spec| spec.default).unwrap_or("")
}

/// Environment variable consulted when a key is absent from the store.
pub fn env_var_name(key: &str) -> String {
    key.to_ascii_uppercase()
}

/// The secret setting key holding a provider's credential.
pub fn api_key_setting(provider: ProviderId) -> Option<&'static str> {
    match provider {
        ProviderId::Openai => Some(LLM_OPENAI_API_KEY),
        ProviderId::Anthropic => Some(LLM_ANTHROPIC_API_KEY),
        ProviderId::Openrouter => Some(LLM_OPENROUTER_API_KEY),
        ProviderId::Gemini => Some(LLM_GEMINI_API_KEY),
        ProviderId::Mistral => Some(LLM_MISTRAL_API_KEY),
        ProviderId::Groq => Some(LLM_GROQ_API_KEY),
        ProviderId::OllamaCloud => Some(LLM_OLLAMA_CLOUD_API_KEY),
        ProviderId::Custom => Some(LLM_CUSTOM_API_KEY),
        ProviderId::Ollama => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_keys_are_all_recognized() {
        for key in SECRET_KEYS {
            assert!(is_recognized(key), "{}", key);
            assert!(is_secret(key), "{}", key);
        }
    }

    #[test]
    fn non_secret_keys_are_not_masked() {
        assert!(!is_secret(LLM_PROVIDER));
        assert!(!is_secret(SMART_UPLOAD_CONFIDENCE_THRESHOLD));
    }

    #[test]
    fn every_cloud_provider_maps_to_a_secret_key() {
        for provider in ProviderId::all() {
            let meta = crate::providers::registry::get_meta(*provider);
            if meta.requires_api_key {
                let key = api_key_setting(*provider).expect("cloud provider needs a key setting");
                assert!(is_secret(key));
            }
        }
    }

    #[test]
    fn env_var_names_are_uppercased_keys() {
        assert_eq!(env_var_name(LLM_PROVIDER), "LLM_PROVIDER");
    }
}
