//! Runtime configuration: snapshot, validation, and merge.
//!
//! The loader reads the settings store once per job (`starting` step),
//! overlays environment fallbacks and compiled-in defaults, validates the
//! combination, and freezes the result. Two concurrent jobs may observe
//! different snapshots; that is acceptable by design.

use super::keys;
use super::store::SettingsStore;
use crate::prompts;
use crate::providers::registry::{self, ProviderId};
use crate::providers::CallTarget;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// One validation failure, keyed by the offending setting.
#[derive(Debug, Clone, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// All violations found in one pass, not just the first.
    #[error("Invalid configuration: {}", format_violations(.0))]
    Invalid(Vec<FieldViolation>),

    #[error("Settings store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Frozen per-invocation configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub provider: ProviderId,
    pub vision_model: String,
    pub verification_model: String,
    /// Resolved endpoint base, trailing slashes stripped.
    pub endpoint: String,
    pub api_key: Option<String>,

    pub skip_parse_threshold: f64,
    pub auto_approve_threshold: f64,
    pub autonomous_approval_threshold: f64,
    pub enable_fully_autonomous_mode: bool,
    pub two_pass_enabled: bool,
    pub send_full_pdf_to_llm: bool,

    pub max_pages_per_part: u32,
    pub budget_max_llm_calls: u32,
    pub budget_max_input_tokens: u64,

    pub vision_system_prompt: String,
    pub verification_system_prompt: String,
    pub header_label_prompt: String,
    pub vision_model_params: Option<serde_json::Value>,
    pub verification_model_params: Option<serde_json::Value>,
    pub prompt_version: String,

    pub allowed_mime_types: Vec<String>,
    pub max_file_size_bytes: u64,
}

impl RuntimeConfig {
    /// Snapshot and validate the current settings.
    pub fn load(store: &dyn SettingsStore) -> Result<RuntimeConfig, ConfigError> {
        let stored = store.get_value_map()?;
        Self::from_value_map(&stored)
    }

    /// Build a config from a raw key/value map, falling back to environment
    /// variables and then compiled-in defaults for absent keys.
    pub fn from_value_map(stored: &HashMap<String, String>) -> Result<RuntimeConfig, ConfigError> {
        let resolve = |key: &str| -> String {
            if let Some(value) = stored.get(key) {
                if !value.is_empty() {
                    return value.clone();
                }
            }
            if let Ok(value) = std::env::var(keys::env_var_name(key)) {
                if !value.is_empty() {
                    return value;
                }
            }
            keys::default_value(key).to_string()
        };

        let mut violations: Vec<FieldViolation> = Vec::new();

        // (i) provider must be in the registry
        let provider_raw = resolve(keys::LLM_PROVIDER);
        let provider = match provider_raw.parse::<ProviderId>() {
            Ok(p) => p,
            Err(()) => {
                violations.push(FieldViolation {
                    field: keys::LLM_PROVIDER.to_string(),
                    reason: format!("unknown provider '{}'", provider_raw),
                });
                // Carry on with a placeholder so the remaining checks still run.
                ProviderId::Ollama
            }
        };
        let meta = registry::get_meta(provider);

        // (ii) cloud providers require a credential
        let api_key = keys::api_key_setting(provider)
            .map(resolve)
            .filter(|k| !k.is_empty());
        if meta.requires_api_key && api_key.is_none() {
            if let Some(key_setting) = keys::api_key_setting(provider) {
                violations.push(FieldViolation {
                    field: key_setting.to_string(),
                    reason: format!("provider '{}' requires an API key", provider),
                });
            }
        }

        // (iii) custom requires an endpoint; everyone else falls back to the
        // registry default
        let user_endpoint = match provider {
            ProviderId::Ollama => resolve(keys::LLM_OLLAMA_ENDPOINT),
            ProviderId::Custom => resolve(keys::LLM_CUSTOM_BASE_URL),
            _ => String::new(),
        };
        if provider == ProviderId::Custom && user_endpoint.is_empty() {
            violations.push(FieldViolation {
                field: keys::LLM_CUSTOM_BASE_URL.to_string(),
                reason: "custom provider requires a base URL".to_string(),
            });
        }
        let endpoint = resolve_endpoint(provider, &user_endpoint);

        // (iv) threshold ordering
        let skip_parse_threshold = parse_threshold(
            keys::SMART_UPLOAD_CONFIDENCE_THRESHOLD,
            &first_present(
                stored,
                &[
                    keys::SMART_UPLOAD_CONFIDENCE_THRESHOLD,
                    keys::LLM_CONFIDENCE_THRESHOLD,
                ],
            )
            .unwrap_or_else(|| resolve(keys::SMART_UPLOAD_CONFIDENCE_THRESHOLD)),
            &mut violations,
        );
        let auto_approve_threshold = parse_threshold(
            keys::SMART_UPLOAD_AUTO_APPROVE_THRESHOLD,
            &resolve(keys::SMART_UPLOAD_AUTO_APPROVE_THRESHOLD),
            &mut violations,
        );
        let autonomous_approval_threshold = parse_threshold(
            keys::SMART_UPLOAD_AUTONOMOUS_APPROVAL_THRESHOLD,
            &resolve(keys::SMART_UPLOAD_AUTONOMOUS_APPROVAL_THRESHOLD),
            &mut violations,
        );
        if skip_parse_threshold > auto_approve_threshold
            || auto_approve_threshold > autonomous_approval_threshold
        {
            violations.push(FieldViolation {
                field: keys::SMART_UPLOAD_AUTO_APPROVE_THRESHOLD.to_string(),
                reason: format!(
                    "thresholds must be ordered: skip ({}) <= auto-approve ({}) <= autonomous ({})",
                    skip_parse_threshold, auto_approve_threshold, autonomous_approval_threshold
                ),
            });
        }

        // (v) model params must be JSON objects
        let vision_model_params =
            parse_model_params(keys::VISION_MODEL_PARAMS, &resolve(keys::VISION_MODEL_PARAMS), &mut violations);
        let verification_model_params = parse_model_params(
            keys::VERIFICATION_MODEL_PARAMS,
            &resolve(keys::VERIFICATION_MODEL_PARAMS),
            &mut violations,
        );

        // (vi) MIME list must be a JSON array of strings
        let mime_raw = resolve(keys::SMART_UPLOAD_ALLOWED_MIME_TYPES);
        let allowed_mime_types = match serde_json::from_str::<Vec<String>>(&mime_raw) {
            Ok(list) => list,
            Err(_) => {
                violations.push(FieldViolation {
                    field: keys::SMART_UPLOAD_ALLOWED_MIME_TYPES.to_string(),
                    reason: "must be a JSON array of strings".to_string(),
                });
                Vec::new()
            }
        };

        // (vii) prompt version must be semver-shaped; treated as opaque after
        let prompt_version = resolve(keys::LLM_PROMPT_VERSION);
        if !is_semver_shaped(&prompt_version) {
            violations.push(FieldViolation {
                field: keys::LLM_PROMPT_VERSION.to_string(),
                reason: format!("'{}' is not semver-shaped (N.N.N)", prompt_version),
            });
        }

        let max_pages_per_part = parse_number::<u32>(
            keys::SMART_UPLOAD_MAX_PAGES_PER_PART,
            &resolve(keys::SMART_UPLOAD_MAX_PAGES_PER_PART),
            &mut violations,
        );
        let budget_max_llm_calls = parse_number::<u32>(
            keys::SMART_UPLOAD_BUDGET_MAX_LLM_CALLS_PER_SESSION,
            &resolve(keys::SMART_UPLOAD_BUDGET_MAX_LLM_CALLS_PER_SESSION),
            &mut violations,
        );
        let budget_max_input_tokens = parse_number::<u64>(
            keys::SMART_UPLOAD_BUDGET_MAX_INPUT_TOKENS_PER_SESSION,
            &resolve(keys::SMART_UPLOAD_BUDGET_MAX_INPUT_TOKENS_PER_SESSION),
            &mut violations,
        );
        let max_file_size_mb = parse_number::<u64>(
            keys::SMART_UPLOAD_MAX_FILE_SIZE_MB,
            &resolve(keys::SMART_UPLOAD_MAX_FILE_SIZE_MB),
            &mut violations,
        );

        if !violations.is_empty() {
            return Err(ConfigError::Invalid(violations));
        }

        let with_default = |stored: String, default: &str| -> String {
            if stored.is_empty() {
                default.to_string()
            } else {
                stored
            }
        };

        Ok(RuntimeConfig {
            provider,
            vision_model: resolve(keys::LLM_VISION_MODEL),
            verification_model: resolve(keys::LLM_VERIFICATION_MODEL),
            endpoint,
            api_key,
            skip_parse_threshold,
            auto_approve_threshold,
            autonomous_approval_threshold,
            enable_fully_autonomous_mode: parse_bool(&resolve(
                keys::SMART_UPLOAD_ENABLE_FULLY_AUTONOMOUS_MODE,
            )),
            two_pass_enabled: parse_bool(&resolve(keys::LLM_TWO_PASS_ENABLED)),
            send_full_pdf_to_llm: parse_bool(&resolve(keys::SMART_UPLOAD_SEND_FULL_PDF_TO_LLM)),
            max_pages_per_part,
            budget_max_llm_calls,
            budget_max_input_tokens,
            vision_system_prompt: with_default(
                resolve(keys::LLM_VISION_SYSTEM_PROMPT),
                prompts::DEFAULT_VISION_SYSTEM_PROMPT,
            ),
            verification_system_prompt: with_default(
                resolve(keys::LLM_VERIFICATION_SYSTEM_PROMPT),
                prompts::DEFAULT_VERIFICATION_SYSTEM_PROMPT,
            ),
            header_label_prompt: with_default(
                resolve(keys::LLM_HEADER_LABEL_PROMPT),
                prompts::DEFAULT_HEADER_LABEL_PROMPT,
            ),
            vision_model_params,
            verification_model_params,
            prompt_version,
            allowed_mime_types,
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
        })
    }

    /// Call target for the primary vision model.
    pub fn vision_target(&self) -> CallTarget {
        CallTarget {
            provider: self.provider,
            model: self.vision_model.clone(),
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
        }
    }

    /// Call target for the verification model.
    pub fn verification_target(&self) -> CallTarget {
        CallTarget {
            provider: self.provider,
            model: self.verification_model.clone(),
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
        }
    }

    /// Whether this config may attach the raw PDF natively.
    pub fn native_pdf_enabled(&self) -> bool {
        self.send_full_pdf_to_llm && registry::get_meta(self.provider).supports_pdf_input
    }
}

fn first_present(stored: &HashMap<String, String>, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|key| stored.get(*key))
        .find(|v| !v.is_empty())
        .cloned()
}

/// Strip trailing slashes, apply provider-specific path requirements.
pub fn resolve_endpoint(provider: ProviderId, user_endpoint: &str) -> String {
    let base = if user_endpoint.is_empty() {
        registry::default_endpoint(provider).to_string()
    } else {
        user_endpoint.trim_end_matches('/').to_string()
    };

    match provider {
        // Gemini URLs are built under the versioned API root.
        ProviderId::Gemini => {
            if base.ends_with("/v1beta") {
                base
            } else {
                format!("{}/v1beta", base)
            }
        }
        // The cloud Ollama surface is OpenAI-compatible under /v<N>.
        ProviderId::OllamaCloud => {
            if has_version_segment(&base) {
                base
            } else {
                format!("{}/v1", base)
            }
        }
        _ => base,
    }
}

fn has_version_segment(url: &str) -> bool {
    url.split('/').any(|segment| {
        segment.len() >= 2
            && segment.starts_with('v')
            && segment[1..].chars().all(|c| c.is_ascii_digit())
    })
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim(), "true" | "1" | "yes" | "on")
}

fn parse_threshold(field: &str, raw: &str, violations: &mut Vec<FieldViolation>) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if (0.0..=100.0).contains(&value) => value,
        Ok(value) => {
            violations.push(FieldViolation {
                field: field.to_string(),
                reason: format!("{} is outside [0, 100]", value),
            });
            value.clamp(0.0, 100.0)
        }
        Err(_) => {
            violations.push(FieldViolation {
                field: field.to_string(),
                reason: format!("'{}' is not a number", raw),
            });
            0.0
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    field: &str,
    raw: &str,
    violations: &mut Vec<FieldViolation>,
) -> T
where
    T: Default,
{
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            violations.push(FieldViolation {
                field: field.to_string(),
                reason: format!("'{}' is not a valid number", raw),
            });
            T::default()
        }
    }
}

fn parse_model_params(
    field: &str,
    raw: &str,
    violations: &mut Vec<FieldViolation>,
) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) if value.is_object() => {
            if value.as_object().map(|o| o.is_empty()).unwrap_or(true) {
                None
            } else {
                Some(value)
            }
        }
        _ => {
            violations.push(FieldViolation {
                field: field.to_string(),
                reason: "must be a JSON object".to_string(),
            });
            None
        }
    }
}

fn is_semver_shaped(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

// ---------------------------------------------------------------------------
// Merge (pure)
// ---------------------------------------------------------------------------

/// Result of merging incoming settings into the existing stored values.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Entries whose stored value actually changes, in input order.
    pub merged: Vec<(String, String)>,
    /// Keys of `merged`, for the audit event and the API response.
    pub changed: Vec<String>,
    /// Unrecognized keys, skipped rather than rejected.
    pub skipped: Vec<String>,
}

/// Merge incoming records into the existing map, resolving secret sentinels.
///
/// Pure: no store access, no clock. `__SET__` on a secret key preserves the
/// stored value; `__UNSET__` or empty clears it.
pub fn merge_updates(
    existing: &HashMap<String, String>,
    incoming: &[(String, String)],
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for (key, raw_value) in incoming {
        if !keys::is_recognized(key) {
            outcome.skipped.push(key.clone());
            continue;
        }

        let current = existing.get(key).map(String::as_str);
        let new_value: Option<String> = if keys::is_secret(key) {
            match raw_value.as_str() {
                keys::SECRET_SET => None,
                keys::SECRET_UNSET | "" => Some(String::new()),
                other => Some(other.to_string()),
            }
        } else {
            Some(raw_value.clone())
        };

        if let Some(value) = new_value {
            if current != Some(value.as_str()) && !(current.is_none() && value.is_empty()) {
                outcome.changed.push(key.clone());
                outcome.merged.push((key.clone(), value));
            }
        }
    }

    outcome
}

/// Mask a stored value for GET responses. Secrets never leave the store in
/// plaintext.
pub fn masked_value(key: &str, value: &str) -> String {
    if keys::is_secret(key) {
        if value.is_empty() {
            keys::SECRET_UNSET.to_string()
        } else {
            keys::SECRET_SET.to_string()
        }
    } else {
        value.to_string()
    }
}
