//! Sync control and local store read endpoints
//!
//! Batch and full syncs run in the background (202 Accepted); progress is
//! observed on `/events`. Only one background sync runs at a time.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use r4_common::db::{Channel, Track};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;

use crate::error::{ApiError, ApiResult};
use crate::services::{AnalysisReport, SyncOptions};
use crate::AppState;

/// `?force=true` skips the staleness check
#[derive(Debug, Default, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: bool,
}

impl ForceQuery {
    fn options(&self) -> SyncOptions {
        SyncOptions {
            skip_check: self.force,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChannelSyncResponse {
    pub slug: String,
    /// Whether a pull actually ran
    pub pulled: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncStartedResponse {
    pub status: String,
    pub job: String,
}

/// GET /channels
pub async fn list_channels(State(state): State<AppState>) -> ApiResult<Json<Vec<Channel>>> {
    Ok(Json(state.engine.channels().await?))
}

/// GET /channels/:slug/tracks
pub async fn list_channel_tracks(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Vec<Track>>> {
    Ok(Json(state.engine.tracks(&slug).await?))
}

/// POST /channels/:slug/sync
///
/// Runs inline; legacy channels get their tracks pulled on demand here.
pub async fn sync_channel(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<ForceQuery>,
) -> ApiResult<Json<ChannelSyncResponse>> {
    let pulled = state.engine.sync_one_channel(&slug, query.options()).await?;
    Ok(Json(ChannelSyncResponse { slug, pulled }))
}

/// POST /sync
pub async fn start_full_sync(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<SyncStartedResponse>)> {
    claim_background_slot(&state)?;

    let task_state = state.clone();
    tokio::spawn(async move {
        let outcome = task_state.engine.full_sync().await.map(|_| ());
        release_background_slot(&task_state, "full sync", outcome).await;
    });

    Ok(started("full"))
}

/// POST /sync/stale
pub async fn start_stale_sync(
    State(state): State<AppState>,
    Query(query): Query<ForceQuery>,
) -> ApiResult<(StatusCode, Json<SyncStartedResponse>)> {
    claim_background_slot(&state)?;

    let options = query.options();
    let task_state = state.clone();
    tokio::spawn(async move {
        let outcome = task_state
            .engine
            .sync_tracks_for_stale(options)
            .await
            .map(|_| ());
        release_background_slot(&task_state, "stale track sync", outcome).await;
    });

    Ok(started("stale"))
}

/// GET /analyze
pub async fn analyze(
    State(state): State<AppState>,
    Query(query): Query<ForceQuery>,
) -> ApiResult<Json<AnalysisReport>> {
    Ok(Json(state.engine.analyze(query.options()).await?))
}

fn claim_background_slot(state: &AppState) -> ApiResult<()> {
    state
        .sync_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .map(|_| ())
        .map_err(|_| ApiError::Conflict("A sync is already running".to_string()))
}

async fn release_background_slot(
    state: &AppState,
    job: &str,
    outcome: crate::error::SyncResult<()>,
) {
    if let Err(e) = outcome {
        tracing::error!(job, error = %e, "Background sync failed");
        *state.last_error.write().await = Some(format!("{}: {}", job, e));
    }
    state.sync_running.store(false, Ordering::SeqCst);
}

fn started(job: &str) -> (StatusCode, Json<SyncStartedResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(SyncStartedResponse {
            status: "started".to_string(),
            job: job.to_string(),
        }),
    )
}

pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/channels", get(list_channels))
        .route("/channels/:slug/tracks", get(list_channel_tracks))
        .route("/channels/:slug/sync", post(sync_channel))
        .route("/sync", post(start_full_sync))
        .route("/sync/stale", post(start_stale_sync))
        .route("/analyze", get(analyze))
}
