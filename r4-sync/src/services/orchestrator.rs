//! Sync Orchestrator
//!
//! Entry points composing the Staleness Detector and the Puller across many
//! channels. Channel pulls run with bounded concurrency and every channel's
//! outcome is settled individually: one failure never aborts its siblings.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use r4_common::config::SyncSettings;
use r4_common::db::{Channel, Origin};
use r4_common::events::{EventBus, SyncEvent};
use r4_common::time;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;

use crate::db::{channels, tracks};
use crate::error::SyncResult;
use crate::services::puller::Puller;
use crate::services::staleness::StalenessDetector;

/// Options shared by the sync and analysis entry points
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Treat every candidate as stale without consulting the detector
    pub skip_check: bool,
}

impl SyncOptions {
    pub fn forced() -> Self {
        Self { skip_check: true }
    }
}

/// A channel pull that failed inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelFailure {
    pub slug: String,
    pub error: String,
}

/// Settled outcome of a batch track sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSyncReport {
    /// Channels considered
    pub candidates: usize,
    /// Channels selected for a pull
    pub stale: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<ChannelFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FullSyncReport {
    /// Live channels written by the metadata pull
    pub live_channels: usize,
    /// Legacy channels newly imported
    pub legacy_channels: usize,
    pub tracks: BatchSyncReport,
    /// Metadata pull failures (track sync still ran)
    pub errors: Vec<String>,
}

/// Per-channel line of an analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelAnalysis {
    pub id: String,
    pub slug: String,
    pub origin: Origin,
    pub needs_sync: bool,
    pub tracks_synced_at: Option<DateTime<Utc>>,
    pub local_tracks: i64,
}

/// Dry-run result: what a batch track sync would pull right now
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub total: usize,
    pub needs_sync: usize,
    pub up_to_date: usize,
    pub channels: Vec<ChannelAnalysis>,
}

pub struct SyncOrchestrator {
    pool: SqlitePool,
    detector: StalenessDetector,
    puller: Puller,
    settings: SyncSettings,
    event_bus: EventBus,
}

impl SyncOrchestrator {
    pub fn new(
        pool: SqlitePool,
        detector: StalenessDetector,
        puller: Puller,
        settings: SyncSettings,
        event_bus: EventBus,
    ) -> Self {
        Self {
            pool,
            detector,
            puller,
            settings,
            event_bus,
        }
    }

    pub fn detector(&self) -> &StalenessDetector {
        &self.detector
    }

    pub fn puller(&self) -> &Puller {
        &self.puller
    }

    /// Pull live and legacy channel metadata concurrently, then sync tracks of
    /// stale live channels
    ///
    /// Legacy tracks are not pulled here; they are fetched on demand through
    /// [`Self::sync_one_channel`].
    pub async fn full_sync(&self) -> SyncResult<FullSyncReport> {
        tracing::info!("Full sync started");

        let (live, legacy) = tokio::join!(
            self.puller.pull_channel_metadata(self.settings.channel_limit),
            self.puller.pull_legacy_channels()
        );

        let mut report = FullSyncReport::default();

        match live {
            Ok(count) => report.live_channels = count,
            Err(e) => {
                tracing::error!(error = %e, "Live channel metadata pull failed");
                report.errors.push(format!("live channels: {}", e));
            }
        }

        match legacy {
            Ok(count) => report.legacy_channels = count,
            Err(e) => {
                tracing::error!(error = %e, "Legacy channel metadata pull failed");
                report.errors.push(format!("legacy channels: {}", e));
            }
        }

        report.tracks = self.sync_tracks_for_stale(SyncOptions::default()).await?;

        tracing::info!(
            live_channels = report.live_channels,
            legacy_channels = report.legacy_channels,
            succeeded = report.tracks.succeeded.len(),
            failed = report.tracks.failed.len(),
            metadata_errors = report.errors.len(),
            "Full sync completed"
        );
        self.event_bus.emit_lossy(SyncEvent::FullSyncCompleted {
            succeeded: report.tracks.succeeded.len(),
            failed: report.tracks.failed.len(),
            timestamp: time::now(),
        });

        Ok(report)
    }

    /// Pull tracks for every live channel that needs it (all of them with `skip_check`)
    pub async fn sync_tracks_for_stale(&self, options: SyncOptions) -> SyncResult<BatchSyncReport> {
        let candidates = self.candidates().await?;
        let selected = self.select_stale(&candidates, options).await;
        let candidate_count = candidates.len();
        let stale: Vec<Channel> = candidates
            .into_iter()
            .filter(|c| selected.contains(&c.id))
            .collect();

        let total = stale.len();
        let mut report = BatchSyncReport {
            candidates: candidate_count,
            stale: total,
            ..BatchSyncReport::default()
        };

        tracing::info!(
            candidates = report.candidates,
            stale = total,
            concurrency = self.settings.concurrency,
            skip_check = options.skip_check,
            "Batch track sync started"
        );

        let mut outcomes = stream::iter(stale)
            .map(|channel: Channel| async move {
                let result = self.puller.pull_tracks(&channel.slug).await;
                (channel.slug, result)
            })
            .buffer_unordered(self.settings.concurrency);

        let mut completed = 0;
        while let Some((slug, result)) = outcomes.next().await {
            completed += 1;
            match result {
                Ok(_) => report.succeeded.push(slug),
                Err(e) => {
                    tracing::warn!(slug = %slug, error = %e, "Channel left unsynced");
                    report.failed.push(ChannelFailure {
                        slug,
                        error: e.to_string(),
                    });
                }
            }
            self.event_bus.emit_lossy(SyncEvent::BatchSyncProgress {
                completed,
                total,
                timestamp: time::now(),
            });
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Batch track sync completed"
        );

        Ok(report)
    }

    /// Pull one channel's tracks if it needs it (always with `skip_check`)
    ///
    /// Returns whether a pull ran. Errors, including `NotFound`, propagate.
    pub async fn sync_one_channel(&self, slug: &str, options: SyncOptions) -> SyncResult<bool> {
        if !options.skip_check && !self.detector.needs_update(slug).await? {
            tracing::debug!(slug = %slug, "Channel up to date, skipping pull");
            return Ok(false);
        }

        self.puller.pull_tracks(slug).await?;
        Ok(true)
    }

    /// Report which channels a batch track sync would pull, without writing anything
    pub async fn analyze(&self, options: SyncOptions) -> SyncResult<AnalysisReport> {
        let candidates = self.candidates().await?;
        let selected = self.select_stale(&candidates, options).await;

        let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
        let stats = tracks::track_stats_grouped(&self.pool, &ids).await?;

        let channels: Vec<ChannelAnalysis> = candidates
            .into_iter()
            .map(|c| ChannelAnalysis {
                needs_sync: selected.contains(&c.id),
                local_tracks: stats.get(&c.id).map(|s| s.count).unwrap_or(0),
                id: c.id,
                slug: c.slug,
                origin: c.origin,
                tracks_synced_at: c.tracks_synced_at,
            })
            .collect();

        let needs_sync = channels.iter().filter(|c| c.needs_sync).count();
        Ok(AnalysisReport {
            total: channels.len(),
            needs_sync,
            up_to_date: channels.len() - needs_sync,
            channels,
        })
    }

    /// Channels eligible for batch track sync
    async fn candidates(&self) -> SyncResult<Vec<Channel>> {
        channels::list_live_channels(&self.pool).await
    }

    /// The one selection rule used by both real runs and analysis
    async fn select_stale(&self, candidates: &[Channel], options: SyncOptions) -> HashSet<String> {
        if options.skip_check {
            return candidates.iter().map(|c| c.id.clone()).collect();
        }

        let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
        self.detector.needs_update_batch(&ids).await
    }
}
