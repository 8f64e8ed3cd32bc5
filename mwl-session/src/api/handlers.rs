//! HTTP request handlers

use crate::api::server::AppContext;
use crate::session::SessionSnapshot;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use mwl_common::events::AudioStatus;
use mwl_common::{Error, Script, Session, SessionPatch};
use mwl_history::{HistoryFilter, Statistics, SyncReport, User};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    script_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    visible: bool,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    /// 0.0-1.0
    volume: f32,
}

#[derive(Debug, Deserialize)]
pub struct IdentityRequest {
    /// Signed-in account id; absent signs out
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MuteResponse {
    muted: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    script_id: Option<String>,
    completed: Option<bool>,
}

impl From<HistoryQuery> for HistoryFilter {
    fn from(q: HistoryQuery) -> Self {
        HistoryFilter {
            from: q.from,
            to: q.to,
            script_id: q.script_id,
            completed: q.completed,
        }
    }
}

type ApiError = (StatusCode, Json<StatusResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(e: Error) -> ApiError {
    let status = match &e {
        Error::InvalidTransition { .. } => StatusCode::CONFLICT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", e);
    }
    (
        status,
        Json(StatusResponse {
            status: format!("error: {}", e),
        }),
    )
}

fn ok() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

// ============================================================================
// Health / Catalog
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "mwl-session".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /scripts
pub async fn list_scripts(State(ctx): State<AppContext>) -> Json<Vec<Script>> {
    Json(ctx.catalog.list())
}

/// POST /identity - sign in or out
///
/// Signing in after anonymous use moves local history to the account.
pub async fn set_identity(
    State(ctx): State<AppContext>,
    Json(req): Json<IdentityRequest>,
) -> Json<StatusResponse> {
    match req.user_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => {
            info!("Signed in as {}", id);
            ctx.identity.set_user(Some(User::authenticated(id)));
        }
        None => {
            info!("Signed out");
            ctx.identity.sign_out();
        }
    }
    ok()
}

// ============================================================================
// Session Control
// ============================================================================

/// POST /session/start
pub async fn start_session(
    State(ctx): State<AppContext>,
    Json(req): Json<StartRequest>,
) -> ApiResult<StartResponse> {
    let session_id = ctx.session.start(req.script_id).await.map_err(api_error)?;
    info!("Session {} started via API", session_id);
    Ok(Json(StartResponse { session_id }))
}

/// POST /session/pause
pub async fn pause_session(State(ctx): State<AppContext>) -> ApiResult<StatusResponse> {
    ctx.session.pause().await.map_err(api_error)?;
    Ok(ok())
}

/// POST /session/resume
pub async fn resume_session(State(ctx): State<AppContext>) -> ApiResult<StatusResponse> {
    ctx.session.resume().await.map_err(api_error)?;
    Ok(ok())
}

/// POST /session/stop
///
/// Returns the finalized session (completed if the duration was reached).
pub async fn stop_session(State(ctx): State<AppContext>) -> ApiResult<Session> {
    ctx.session.stop().await.map(Json).map_err(api_error)
}

/// POST /session/visibility
pub async fn set_visibility(
    State(ctx): State<AppContext>,
    Json(req): Json<VisibilityRequest>,
) -> ApiResult<SessionSnapshot> {
    ctx.session
        .set_visibility(req.visible)
        .await
        .map(Json)
        .map_err(api_error)
}

/// GET /session/state
pub async fn get_state(State(ctx): State<AppContext>) -> ApiResult<SessionSnapshot> {
    ctx.session.snapshot().await.map(Json).map_err(api_error)
}

// ============================================================================
// Audio
// ============================================================================

/// POST /audio/volume
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Json(req): Json<VolumeRequest>,
) -> ApiResult<AudioStatus> {
    if !(0.0..=1.0).contains(&req.volume) {
        return Err(api_error(Error::Validation(format!(
            "volume {} outside 0.0-1.0",
            req.volume
        ))));
    }
    ctx.session
        .set_volume(req.volume)
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /audio/mute - toggle mute
pub async fn toggle_mute(State(ctx): State<AppContext>) -> ApiResult<MuteResponse> {
    let muted = ctx.session.toggle_mute().await.map_err(api_error)?;
    Ok(Json(MuteResponse { muted }))
}

// ============================================================================
// History
// ============================================================================

/// GET /history?from&to&script_id&completed
pub async fn list_history(
    State(ctx): State<AppContext>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<Session>> {
    let filter = HistoryFilter::from(query);
    ctx.history.list(&filter).await.map(Json).map_err(api_error)
}

/// GET /history/stats
pub async fn history_stats(State(ctx): State<AppContext>) -> ApiResult<Statistics> {
    ctx.history.stats().await.map(Json).map_err(api_error)
}

/// PATCH /history/:id
pub async fn update_history(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
    Json(patch): Json<SessionPatch>,
) -> ApiResult<Session> {
    ctx.history
        .update(id, &patch)
        .await
        .map(Json)
        .map_err(api_error)
}

/// DELETE /history/:id
pub async fn delete_history(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusResponse> {
    ctx.history.delete(id).await.map_err(api_error)?;
    Ok(ok())
}

/// POST /history/sync
pub async fn sync_history(State(ctx): State<AppContext>) -> ApiResult<SyncReport> {
    ctx.history
        .sync_local_to_cloud()
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /history/retry - save sessions whose earlier save failed
pub async fn retry_pending(State(ctx): State<AppContext>) -> ApiResult<CountResponse> {
    let count = ctx.session.retry_pending().await.map_err(api_error)?;
    Ok(Json(CountResponse { count }))
}

/// GET /history/export - local record as JSON
pub async fn export_history(State(ctx): State<AppContext>) -> Result<String, ApiError> {
    ctx.history.local().export_json().await.map_err(api_error)
}

/// POST /history/import - merge an exported local record
pub async fn import_history(
    State(ctx): State<AppContext>,
    body: String,
) -> ApiResult<CountResponse> {
    let count = ctx
        .history
        .local()
        .import_json(&body)
        .await
        .map_err(api_error)?;
    Ok(Json(CountResponse { count }))
}
