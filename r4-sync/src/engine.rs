//! SyncEngine context
//!
//! Built once at startup and shared (behind `Arc`) by the CLI, the HTTP surface
//! and tests. It owns every component; nothing is held in globals.

use r4_common::config::SyncSettings;
use r4_common::db::{Channel, Track};
use r4_common::events::{EventBus, SyncEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::db::{channels, tracks};
use crate::error::{SyncError, SyncResult};
use crate::services::{
    AnalysisReport, BatchSyncReport, FullSyncReport, LegacyArchive, Puller, RemoteGateway,
    StalenessDetector, SyncOptions, SyncOrchestrator,
};

pub struct SyncEngine {
    pool: SqlitePool,
    orchestrator: SyncOrchestrator,
    event_bus: EventBus,
    settings: SyncSettings,
}

impl SyncEngine {
    /// Wire the components together
    ///
    /// Busy flags left over from a previous process are cleared here: no pull
    /// can be in flight before the engine exists.
    pub async fn new(
        pool: SqlitePool,
        remote: Arc<dyn RemoteGateway>,
        legacy: Arc<dyn LegacyArchive>,
        settings: SyncSettings,
        event_bus: EventBus,
    ) -> SyncResult<Self> {
        settings.validate()?;

        let cleared = channels::clear_busy_flags(&pool).await?;
        if cleared > 0 {
            tracing::warn!(channels = cleared, "Cleared busy flags left by an interrupted run");
        }

        let detector = StalenessDetector::new(pool.clone(), remote.clone(), settings.tolerance_secs);
        let puller = Puller::new(
            pool.clone(),
            remote,
            legacy,
            settings.clone(),
            event_bus.clone(),
        );
        let orchestrator = SyncOrchestrator::new(
            pool.clone(),
            detector,
            puller,
            settings.clone(),
            event_bus.clone(),
        );

        Ok(Self {
            pool,
            orchestrator,
            event_bus,
            settings,
        })
    }

    pub async fn full_sync(&self) -> SyncResult<FullSyncReport> {
        self.orchestrator.full_sync().await
    }

    pub async fn sync_one_channel(&self, slug: &str, options: SyncOptions) -> SyncResult<bool> {
        self.orchestrator.sync_one_channel(slug, options).await
    }

    pub async fn sync_tracks_for_stale(&self, options: SyncOptions) -> SyncResult<BatchSyncReport> {
        self.orchestrator.sync_tracks_for_stale(options).await
    }

    pub async fn analyze(&self, options: SyncOptions) -> SyncResult<AnalysisReport> {
        self.orchestrator.analyze(options).await
    }

    /// Per-channel staleness answer (unknown slug is `NotFound`)
    pub async fn needs_update(&self, slug: &str) -> SyncResult<bool> {
        self.orchestrator.detector().needs_update(slug).await
    }

    /// All local channels, newest first
    pub async fn channels(&self) -> SyncResult<Vec<Channel>> {
        channels::list_channels(&self.pool).await
    }

    pub async fn channel(&self, slug: &str) -> SyncResult<Option<Channel>> {
        channels::find_by_slug(&self.pool, slug).await
    }

    /// Local tracks of a channel in creation order
    pub async fn tracks(&self, slug: &str) -> SyncResult<Vec<Track>> {
        let channel = self
            .channel(slug)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("channel '{}'", slug)))?;
        tracks::list_tracks(&self.pool, &channel.id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
