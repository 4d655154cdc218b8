//! Admin settings HTTP routes.
//!
//! Provides endpoints for:
//! - Reading the smart upload configuration (secrets masked)
//! - Updating settings with secret-preserving merge semantics
//! - Resetting the prompt keys to compiled-in defaults
//! - Probing a provider's connectivity without persisting anything

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::prompts;
use crate::providers::registry::{self, ProviderId};
use crate::providers::ProviderError;
use crate::settings::{self, keys, ConfigError, FieldViolation, RuntimeConfig};

use super::session::{Permission, Session};
use super::state::ServerState;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
struct SettingsResponse {
    settings: Vec<MaskedSetting>,
}

#[derive(Debug, Serialize)]
struct MaskedSetting {
    id: i64,
    key: String,
    value: String,
    description: Option<String>,
    #[serde(rename = "updatedAt")]
    updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "updatedBy")]
    updated_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateSettingsBody {
    settings: Vec<IncomingSetting>,
}

#[derive(Debug, Deserialize)]
struct IncomingSetting {
    key: String,
    value: Value,
}

#[derive(Debug, Serialize)]
struct UpdateSettingsResponse {
    success: bool,
    updated: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ValidationErrorResponse {
    error: &'static str,
    violations: Vec<FieldViolation>,
}

#[derive(Debug, Serialize)]
struct ResetPromptsResponse {
    success: bool,
    message: String,
    prompts: PromptValues,
}

#[derive(Debug, Serialize)]
struct PromptValues {
    #[serde(rename = "visionSystemPrompt")]
    vision_system_prompt: String,
    #[serde(rename = "verificationSystemPrompt")]
    verification_system_prompt: String,
    #[serde(rename = "promptVersion")]
    prompt_version: String,
}

#[derive(Debug, Deserialize)]
struct TestConnectionBody {
    provider: Option<String>,
    endpoint: Option<String>,
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct TestConnectionResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn bad_request(message: impl Into<String>) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /admin/uploads/settings
async fn get_settings(session: Session, State(state): State<ServerState>) -> impl IntoResponse {
    if !session.has_permission(Permission::ManageSystemConfig) {
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.settings_store.get_all() {
        Ok(records) => {
            let settings = records
                .into_iter()
                .map(|record| MaskedSetting {
                    value: settings::masked_value(&record.key, &record.value),
                    id: record.id,
                    key: record.key,
                    description: record.description,
                    updated_at: record.updated_at,
                    updated_by: record.updated_by,
                })
                .collect();
            Json(SettingsResponse { settings }).into_response()
        }
        Err(e) => {
            warn!("Failed to read settings: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read settings").into_response()
        }
    }
}

/// Incoming values may be any JSON type; settings are stored as strings.
fn coerce_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// PUT /admin/uploads/settings
async fn update_settings(
    session: Session,
    State(state): State<ServerState>,
    Json(body): Json<UpdateSettingsBody>,
) -> impl IntoResponse {
    if !session.has_permission(Permission::ManageSystemConfig) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !session.csrf_valid() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let incoming: Vec<(String, String)> = body
        .settings
        .iter()
        .map(|setting| (setting.key.clone(), coerce_value(&setting.value)))
        .collect();

    let existing = match state.settings_store.get_value_map() {
        Ok(map) => map,
        Err(e) => {
            warn!("Failed to read settings for merge: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read settings")
                .into_response();
        }
    };

    let outcome = settings::merge_updates(&existing, &incoming);
    if outcome.merged.is_empty() {
        return Json(UpdateSettingsResponse {
            success: true,
            updated: Vec::new(),
            skipped: outcome.skipped,
        })
        .into_response();
    }

    // Strict validation over the would-be stored state before anything is
    // written.
    let mut merged_map: HashMap<String, String> = existing;
    for (key, value) in &outcome.merged {
        merged_map.insert(key.clone(), value.clone());
    }
    if let Err(ConfigError::Invalid(violations)) = RuntimeConfig::from_value_map(&merged_map) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ValidationErrorResponse {
                error: "validation_failed",
                violations,
            }),
        )
            .into_response();
    }

    if let Err(e) = state
        .settings_store
        .upsert_many(&outcome.merged, Some(&session.user_id))
    {
        warn!("Failed to persist settings: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist settings")
            .into_response();
    }

    if let Err(e) = state
        .audit
        .log_settings_updated(Some(&session.user_id), &outcome.changed)
    {
        warn!("Failed to write settings audit event: {}", e);
    }
    info!(
        user_id = %session.user_id,
        changed = ?outcome.changed,
        "Smart upload settings updated"
    );

    Json(UpdateSettingsResponse {
        success: true,
        updated: outcome.changed,
        skipped: outcome.skipped,
    })
    .into_response()
}

/// POST /admin/uploads/settings/reset-prompts
async fn reset_prompts(session: Session, State(state): State<ServerState>) -> impl IntoResponse {
    if !session.has_permission(Permission::ManageSystemConfig) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !session.csrf_valid() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let defaults = vec![
        (
            keys::LLM_VISION_SYSTEM_PROMPT.to_string(),
            prompts::DEFAULT_VISION_SYSTEM_PROMPT.to_string(),
        ),
        (
            keys::LLM_VERIFICATION_SYSTEM_PROMPT.to_string(),
            prompts::DEFAULT_VERIFICATION_SYSTEM_PROMPT.to_string(),
        ),
        (
            keys::LLM_PROMPT_VERSION.to_string(),
            prompts::DEFAULT_PROMPT_VERSION.to_string(),
        ),
    ];

    if let Err(e) = state
        .settings_store
        .upsert_many(&defaults, Some(&session.user_id))
    {
        warn!("Failed to reset prompts: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to reset prompts").into_response();
    }
    if let Err(e) = state.audit.log_prompts_reset(Some(&session.user_id)) {
        warn!("Failed to write prompt-reset audit event: {}", e);
    }

    Json(ResetPromptsResponse {
        success: true,
        message: "Prompts reset to defaults".to_string(),
        prompts: PromptValues {
            vision_system_prompt: prompts::DEFAULT_VISION_SYSTEM_PROMPT.to_string(),
            verification_system_prompt: prompts::DEFAULT_VERIFICATION_SYSTEM_PROMPT.to_string(),
            prompt_version: prompts::DEFAULT_PROMPT_VERSION.to_string(),
        },
    })
    .into_response()
}

/// POST /admin/uploads/settings/test
async fn test_connection(
    session: Session,
    State(state): State<ServerState>,
    Json(body): Json<TestConnectionBody>,
) -> impl IntoResponse {
    if !session.has_permission(Permission::ManageSystemConfig) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !session.csrf_valid() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let Some(provider_name) = body.provider.as_deref() else {
        return bad_request("provider is required");
    };
    let Ok(provider) = provider_name.parse::<ProviderId>() else {
        return bad_request(format!("unknown provider '{}'", provider_name));
    };
    let meta = registry::get_meta(provider);

    if body.model.as_deref().map(str::trim).unwrap_or("").is_empty() {
        return bad_request("model is required");
    }
    let api_key = body.api_key.as_deref().filter(|k| !k.is_empty());
    if meta.requires_api_key && api_key.is_none() {
        return bad_request(format!("apiKey is required for provider '{}'", provider));
    }
    if provider == ProviderId::Custom
        && body.endpoint.as_deref().map(str::trim).unwrap_or("").is_empty()
    {
        return bad_request("endpoint is required for the custom provider");
    }

    let endpoint = settings::resolve_endpoint(provider, body.endpoint.as_deref().unwrap_or(""));

    let (response, success, audit_message) =
        match state.vision.probe_models(provider, &endpoint, api_key).await {
            Ok(probe) => {
                let message = match probe.model_count {
                    Some(count) => format!("Connection successful: {} models listed.", count),
                    None => "Connection successful.".to_string(),
                };
                (
                    TestConnectionResponse {
                        ok: true,
                        message: Some(message.clone()),
                        error: None,
                        detail: None,
                    },
                    true,
                    message,
                )
            }
            Err(ProviderError::Rejected { status, detail }) => {
                let hint = if status == 401 || status == 403 {
                    " — check your API key."
                } else {
                    "."
                };
                let error = format!("Connection failed: server responded with {}{}", status, hint);
                (
                    TestConnectionResponse {
                        ok: false,
                        message: None,
                        error: Some(error.clone()),
                        detail: if detail.is_empty() { None } else { Some(detail) },
                    },
                    false,
                    error,
                )
            }
            Err(e) => {
                let error = format!("Connection failed: {}", e);
                (
                    TestConnectionResponse {
                        ok: false,
                        message: None,
                        error: Some(error.clone()),
                        detail: None,
                    },
                    false,
                    error,
                )
            }
        };

    if let Err(e) = state.audit.log_provider_test(
        Some(&session.user_id),
        provider.as_str(),
        success,
        &audit_message,
    ) {
        warn!("Failed to write provider-test audit event: {}", e);
    }

    Json(response).into_response()
}

/// OPTIONS handler for the settings surface.
async fn settings_options() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        "GET, PUT, POST, OPTIONS".parse().unwrap(),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        "Content-Type, Authorization, x-csrf-token".parse().unwrap(),
    );
    (StatusCode::NO_CONTENT, headers)
}

// =============================================================================
// Router Construction
// =============================================================================

/// Build the admin settings routes (mounted under /admin/uploads/settings).
///
/// All routes require a session with the system-config permission; mutations
/// additionally require the CSRF header.
pub fn settings_routes() -> Router<ServerState> {
    Router::new()
        .route(
            "/",
            get(get_settings)
                .put(update_settings)
                .options(settings_options),
        )
        .route("/reset-prompts", post(reset_prompts))
        .route("/test", post(test_connection))
}
