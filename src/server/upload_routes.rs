//! Upload HTTP routes.
//!
//! Provides endpoints for:
//! - Uploading a sheet music PDF, which creates a session and enqueues the
//!   processing job
//! - Reading a session's state
//! - Listing recent sessions

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::settings::RuntimeConfig;
use crate::smart_upload::{original_storage_key, UploadSession};
use crate::storage::ObjectMeta;

use super::session::{Permission, Session};
use super::state::ServerState;

#[derive(Debug, Serialize)]
struct UploadResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "jobId")]
    job_id: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session: UploadSession,
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

/// POST /uploads - accept a PDF, create a session, enqueue processing.
async fn upload_score(
    session: Session,
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    if !session.has_permission(Permission::ManageUploads) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !session.csrf_valid() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let config = match RuntimeConfig::load(state.settings_store.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            warn!("Upload rejected, configuration invalid: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Smart upload configuration is invalid".to_string(),
                }),
            )
                .into_response();
        }
    };

    let mut filename: Option<String> = None;
    let mut data: Option<Vec<u8>> = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            filename = field.file_name().map(|s| s.to_string());
            match field.bytes().await {
                Ok(bytes) => data = Some(bytes.to_vec()),
                Err(e) => {
                    warn!("Failed to read upload body: {}", e);
                    return bad_request("Failed to read file");
                }
            }
        }
    }

    let filename = match filename {
        Some(f) if !f.is_empty() => f,
        _ => return bad_request("No filename provided"),
    };
    let data = match data {
        Some(d) if !d.is_empty() => d,
        _ => return bad_request("No file data provided"),
    };

    if data.len() as u64 > config.max_file_size_bytes {
        return bad_request(format!(
            "File is {} bytes, over the {} byte limit",
            data.len(),
            config.max_file_size_bytes
        ));
    }

    // Sniff the real type rather than trusting the client's declaration.
    let mime_type = infer::get(&data)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    if !config.allowed_mime_types.iter().any(|m| m == &mime_type) {
        return bad_request(format!("MIME type '{}' is not accepted", mime_type));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let storage_key = original_storage_key(&session_id, ".pdf");

    let mut meta = ObjectMeta::new();
    meta.insert("sessionId".to_string(), session_id.clone());
    meta.insert("originalFilename".to_string(), filename.clone());
    if let Err(e) = state.object_store.put_object(&storage_key, &data, &meta).await {
        warn!("Failed to store upload: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to store upload".to_string(),
            }),
        )
            .into_response();
    }

    let upload_session = UploadSession::new(
        session_id.clone(),
        filename,
        data.len() as u64,
        mime_type,
        storage_key.clone(),
        Some(session.user_id.clone()),
    );
    if let Err(e) = state.session_store.create(&upload_session) {
        warn!("Failed to create session: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to create session".to_string(),
            }),
        )
            .into_response();
    }

    let job_id = match state.job_queue.enqueue_process(&session_id, &storage_key) {
        Ok(id) => id,
        Err(e) => {
            warn!("Failed to enqueue processing job: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to enqueue processing".to_string(),
                }),
            )
                .into_response();
        }
    };

    info!(
        session_id = %session_id,
        user_id = %session.user_id,
        "Smart upload accepted"
    );
    Json(UploadResponse {
        session_id,
        job_id,
        status: "PENDING".to_string(),
    })
    .into_response()
}

/// GET /uploads/{id} - session state.
async fn get_upload_session(
    session: Session,
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if !session.has_permission(Permission::ManageUploads) {
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.session_store.get(&session_id) {
        Ok(Some(upload_session)) => Json(SessionResponse {
            session: upload_session,
        })
        .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to load session {}: {}", session_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to load session").into_response()
        }
    }
}

/// GET /uploads - recent sessions.
async fn list_upload_sessions(
    session: Session,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    if !session.has_permission(Permission::ManageUploads) {
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.session_store.list_recent(50) {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => {
            warn!("Failed to list sessions: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list sessions").into_response()
        }
    }
}

/// Build the upload routes (mounted under /uploads).
pub fn upload_routes() -> Router<ServerState> {
    Router::new()
        .route(
            "/",
            post(upload_score)
                .get(list_upload_sessions)
                .layer(DefaultBodyLimit::max(256 * 1024 * 1024)),
        )
        .route("/{id}", get(get_upload_session))
}
