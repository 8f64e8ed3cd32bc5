//! HTTP server setup and routing

use crate::catalog::ScriptCatalog;
use crate::session::SessionHandle;
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use mwl_common::events::EventBus;
use mwl_history::{HistoryStore, IdentityHandle};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub session: SessionHandle,
    pub history: Arc<HistoryStore>,
    pub identity: Arc<IdentityHandle>,
    pub catalog: Arc<dyn ScriptCatalog>,
    pub events: Arc<EventBus>,
}

pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        .route("/scripts", get(super::handlers::list_scripts))
        .route("/identity", post(super::handlers::set_identity))
        // Session control
        .route("/session/start", post(super::handlers::start_session))
        .route("/session/pause", post(super::handlers::pause_session))
        .route("/session/resume", post(super::handlers::resume_session))
        .route("/session/stop", post(super::handlers::stop_session))
        .route("/session/visibility", post(super::handlers::set_visibility))
        .route("/session/state", get(super::handlers::get_state))
        // Audio
        .route("/audio/volume", post(super::handlers::set_volume))
        .route("/audio/mute", post(super::handlers::toggle_mute))
        // History
        .route("/history", get(super::handlers::list_history))
        .route("/history/stats", get(super::handlers::history_stats))
        .route("/history/sync", post(super::handlers::sync_history))
        .route("/history/retry", post(super::handlers::retry_pending))
        .route("/history/export", get(super::handlers::export_history))
        .route("/history/import", post(super::handlers::import_history))
        .route(
            "/history/:id",
            axum::routing::patch(super::handlers::update_history)
                .delete(super::handlers::delete_history),
        )
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API until `shutdown` resolves
pub async fn run(
    port: u16,
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(ctx);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;
    Ok(())
}
