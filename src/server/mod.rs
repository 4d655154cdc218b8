//! HTTP server assembly for the smart upload surface.

pub mod session;
mod settings_routes;
mod state;
mod upload_routes;

pub use session::{
    AuthenticatedUser, Permission, Session, SessionAuthenticator, StaticTokenAuthenticator,
};
pub use state::ServerState;

use anyhow::{Context, Result};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Assemble the application router.
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .nest("/admin/uploads/settings", settings_routes::settings_routes())
        .nest("/uploads", upload_routes::upload_routes())
        .with_state(state)
}

/// Bind and serve until the shutdown token fires.
pub async fn run_server(state: ServerState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Server error")?;
    Ok(())
}
