//! r4-sync library interface
//!
//! Local-first sync engine for channel and track metadata, plus the HTTP control
//! surface that drives it. Exposed as a library for integration testing and for
//! embedding in other front ends.

pub mod api;
pub mod db;
pub mod engine;
pub mod error;
pub mod services;
pub mod utils;

pub use crate::engine::SyncEngine;
pub use crate::error::{ApiError, ApiResult, SyncError, SyncResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last background sync error, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
    /// Set while a background batch or full sync runs
    pub sync_running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
            sync_running: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::sync_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
