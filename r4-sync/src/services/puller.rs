//! Puller
//!
//! Writes remote and legacy data into the local store:
//! - channel metadata (live upsert, legacy backfill)
//! - the full track set of one channel, in fixed-size chunks inside one transaction
//!
//! Track pull lifecycle per channel:
//! `busy` set (compare-and-set) → fetch → sort → chunked upsert → commit → `busy`
//! cleared and checkpoint advanced. On any failure the transaction rolls back,
//! `busy` is cleared and the checkpoint is left as it was, so the channel still
//! reads as needing sync.

use chrono::{DateTime, Utc};
use r4_common::config::SyncSettings;
use r4_common::db::{Channel, Origin, Track};
use r4_common::events::{ChannelSource, EventBus, SyncEvent};
use r4_common::time::{self, from_epoch_millis};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{channels, tracks};
use crate::error::{SyncError, SyncResult};
use crate::services::legacy_archive::{LegacyArchive, LegacyChannel, LegacyError, LegacyTrack};
use crate::services::remote_gateway::{RemoteChannel, RemoteGateway, RemoteTrack};
use crate::utils::db_retry::retry_on_lock;

/// Outcome of one successful track pull
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PullReport {
    pub slug: String,
    pub origin: Origin,
    /// Tracks written
    pub tracks: usize,
    /// Rows per chunk, in write order
    pub chunk_sizes: Vec<usize>,
    /// Cooperative yields taken between chunks
    pub yields: usize,
}

pub struct Puller {
    pool: SqlitePool,
    remote: Arc<dyn RemoteGateway>,
    legacy: Arc<dyn LegacyArchive>,
    settings: SyncSettings,
    event_bus: EventBus,
}

impl Puller {
    pub fn new(
        pool: SqlitePool,
        remote: Arc<dyn RemoteGateway>,
        legacy: Arc<dyn LegacyArchive>,
        settings: SyncSettings,
        event_bus: EventBus,
    ) -> Self {
        Self {
            pool,
            remote,
            legacy,
            settings,
            event_bus,
        }
    }

    /// Fetch up to `limit` live channels and upsert them by id
    ///
    /// Returns the number of channels written.
    pub async fn pull_channel_metadata(&self, limit: usize) -> SyncResult<usize> {
        let remote_channels = self.remote.list_channels(limit).await?;
        let rows: Vec<Channel> = remote_channels.into_iter().map(live_channel_row).collect();

        let count = retry_on_lock("upsert_live_channels", self.settings.lock_wait_ms, || {
            channels::upsert_live_channels(&self.pool, &rows)
        })
        .await?;

        tracing::info!(count, "Pulled live channel metadata");
        self.event_bus.emit_lossy(SyncEvent::ChannelsPulled {
            source: ChannelSource::Live,
            count,
            timestamp: time::now(),
        });

        Ok(count)
    }

    /// Backfill legacy channels that have an image, enough tracks, and a slug
    /// not already present locally
    ///
    /// Returns the number of channels inserted.
    pub async fn pull_legacy_channels(&self) -> SyncResult<usize> {
        let snapshot = self.legacy.list_legacy_channels().await?;
        let existing = channels::list_slugs(&self.pool).await?;
        let snapshot_size = snapshot.len();

        let rows: Vec<Channel> = snapshot
            .into_iter()
            .filter(|c| {
                c.image.as_deref().is_some_and(|image| !image.is_empty())
                    && c.track_count >= self.settings.legacy_min_tracks
                    && !existing.contains(&c.slug)
            })
            .map(legacy_channel_row)
            .collect();

        let count = retry_on_lock("insert_legacy_channels", self.settings.lock_wait_ms, || {
            channels::insert_legacy_channels(&self.pool, &rows)
        })
        .await?;

        tracing::info!(
            snapshot = snapshot_size,
            eligible = rows.len(),
            inserted = count,
            "Pulled legacy channel metadata"
        );
        self.event_bus.emit_lossy(SyncEvent::ChannelsPulled {
            source: ChannelSource::Legacy,
            count,
            timestamp: time::now(),
        });

        Ok(count)
    }

    /// Pull the full track set of one channel
    ///
    /// Fails with `NotFound` for an unknown slug and `ChannelBusy` when a pull of
    /// the same channel is already running.
    pub async fn pull_tracks(&self, slug: &str) -> SyncResult<PullReport> {
        let channel = channels::find_by_slug(&self.pool, slug)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("channel '{}'", slug)))?;

        if !channels::try_mark_busy(&self.pool, &channel.id).await? {
            return Err(SyncError::ChannelBusy(slug.to_string()));
        }

        tracing::info!(slug = %slug, origin = ?channel.origin, "Track pull started");
        self.event_bus.emit_lossy(SyncEvent::ChannelSyncStarted {
            slug: slug.to_string(),
            timestamp: time::now(),
        });

        let result = match self.fetch_and_write(&channel).await {
            Ok(report) => self.finish(&channel, Some(time::now())).await.map(|_| report),
            Err(e) => {
                if let Err(clear_err) = self.finish(&channel, None).await {
                    tracing::error!(
                        slug = %slug,
                        error = %clear_err,
                        "Failed to clear busy flag after failed pull"
                    );
                }
                Err(e)
            }
        };

        match &result {
            Ok(report) => {
                tracing::info!(
                    slug = %slug,
                    tracks = report.tracks,
                    chunks = report.chunk_sizes.len(),
                    "Track pull completed"
                );
                self.event_bus.emit_lossy(SyncEvent::ChannelSyncCompleted {
                    slug: slug.to_string(),
                    tracks: report.tracks,
                    timestamp: time::now(),
                });
            }
            Err(e) => {
                tracing::warn!(slug = %slug, error = %e, "Track pull failed");
                self.event_bus.emit_lossy(SyncEvent::ChannelSyncFailed {
                    slug: slug.to_string(),
                    error: e.to_string(),
                    timestamp: time::now(),
                });
            }
        }

        result
    }

    async fn finish(&self, channel: &Channel, checkpoint: Option<DateTime<Utc>>) -> SyncResult<()> {
        retry_on_lock("finish_pull", self.settings.lock_wait_ms, || {
            channels::finish_pull(&self.pool, &channel.id, checkpoint)
        })
        .await
    }

    async fn fetch_and_write(&self, channel: &Channel) -> SyncResult<PullReport> {
        let mut rows = match &channel.origin {
            Origin::Live => {
                let remote_tracks = self.remote.list_tracks(&channel.slug).await?;
                remote_tracks
                    .into_iter()
                    .map(|t| live_track_row(&channel.id, t))
                    .collect::<Vec<_>>()
            }
            Origin::Legacy(legacy_id) => {
                let legacy_tracks = self.legacy.list_legacy_tracks(legacy_id).await?;
                legacy_tracks
                    .into_iter()
                    .map(|t| legacy_track_row(&channel.id, t))
                    .collect::<SyncResult<Vec<_>>>()?
            }
        };

        // Deterministic local order regardless of how the source returned them
        rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.legacy_origin_id.cmp(&b.legacy_origin_id))
                .then_with(|| a.id.cmp(&b.id))
        });

        let (chunk_sizes, yields) = self.write_chunks(&channel.slug, &rows).await?;

        Ok(PullReport {
            slug: channel.slug.clone(),
            origin: channel.origin.clone(),
            tracks: rows.len(),
            chunk_sizes,
            yields,
        })
    }

    /// Write `rows` in one transaction, one chunk at a time
    ///
    /// A lock timeout retries the whole write from a fresh transaction.
    async fn write_chunks(&self, slug: &str, rows: &[Track]) -> SyncResult<(Vec<usize>, usize)> {
        retry_on_lock("write_tracks", self.settings.lock_wait_ms, || {
            self.write_chunks_once(slug, rows)
        })
        .await
    }

    /// Upsert chunk by chunk with a cooperative yield between chunks; nothing is
    /// visible until the final commit
    async fn write_chunks_once(
        &self,
        slug: &str,
        rows: &[Track],
    ) -> SyncResult<(Vec<usize>, usize)> {
        let mut tx = self.pool.begin().await.map_err(SyncError::LocalWriteFailed)?;
        let mut chunk_sizes = Vec::new();
        let mut yields = 0;

        for (index, chunk) in rows.chunks(self.settings.chunk_size).enumerate() {
            if index > 0 {
                tokio::task::yield_now().await;
                yields += 1;
            }

            tracks::upsert_tracks(&mut tx, chunk).await?;

            tracing::debug!(slug = %slug, chunk = index, rows = chunk.len(), "Wrote track chunk");
            chunk_sizes.push(chunk.len());
        }

        tx.commit().await.map_err(SyncError::LocalWriteFailed)?;

        Ok((chunk_sizes, yields))
    }
}

fn live_channel_row(channel: RemoteChannel) -> Channel {
    Channel {
        id: channel.id,
        slug: channel.slug,
        name: channel.name,
        description: channel.description,
        image: channel.image,
        created_at: channel.created_at,
        updated_at: channel.updated_at,
        origin: Origin::Live,
        tracks_synced_at: None,
        busy: false,
    }
}

fn legacy_channel_row(channel: LegacyChannel) -> Channel {
    Channel {
        id: Uuid::new_v4().to_string(),
        slug: channel.slug,
        name: channel.name,
        description: channel.description,
        image: channel.image,
        created_at: channel.created_at,
        updated_at: channel.updated_at.unwrap_or(channel.created_at),
        origin: Origin::Legacy(channel.firebase_id),
        tracks_synced_at: None,
        busy: false,
    }
}

fn live_track_row(channel_id: &str, track: RemoteTrack) -> Track {
    Track {
        id: track.id,
        channel_id: channel_id.to_string(),
        url: track.url,
        title: track.title,
        description: track.description,
        discogs_url: track.discogs_url,
        created_at: track.created_at,
        updated_at: track.updated_at,
        legacy_origin_id: None,
    }
}

fn legacy_track_row(channel_id: &str, track: LegacyTrack) -> SyncResult<Track> {
    let invalid = |millis: i64| {
        SyncError::LegacyUnavailable(LegacyError::Parse(format!(
            "track {} has invalid timestamp {}",
            track.id, millis
        )))
    };

    let created_at = from_epoch_millis(track.created).ok_or_else(|| invalid(track.created))?;
    let updated_at = match track.updated {
        Some(millis) => from_epoch_millis(millis).ok_or_else(|| invalid(millis))?,
        None => created_at,
    };

    Ok(Track {
        id: Uuid::new_v4().to_string(),
        channel_id: channel_id.to_string(),
        url: track.url,
        title: track.title,
        description: track.body,
        discogs_url: track.discogs_url,
        created_at,
        updated_at,
        legacy_origin_id: Some(track.id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn legacy_track(id: &str, created: i64, updated: Option<i64>) -> LegacyTrack {
        LegacyTrack {
            id: id.to_string(),
            url: "https://www.youtube.com/watch?v=x".to_string(),
            title: "Song".to_string(),
            body: Some("notes".to_string()),
            discogs_url: None,
            created,
            updated,
        }
    }

    #[test]
    fn test_legacy_track_mapping() {
        let row = legacy_track_row("c1", legacy_track("-T1", 1_500_000_000_000, None)).unwrap();

        assert_eq!(row.channel_id, "c1");
        assert_eq!(row.legacy_origin_id.as_deref(), Some("-T1"));
        assert_eq!(row.description.as_deref(), Some("notes"));
        assert_eq!(row.created_at, Utc.timestamp_millis_opt(1_500_000_000_000).unwrap());
        assert_eq!(row.updated_at, row.created_at);
    }

    #[test]
    fn test_legacy_track_keeps_updated_time() {
        let row = legacy_track_row("c1", legacy_track("-T1", 1_000, Some(5_000))).unwrap();
        assert_eq!(row.updated_at, Utc.timestamp_millis_opt(5_000).unwrap());
    }

    #[test]
    fn test_legacy_track_rejects_out_of_range_time() {
        let result = legacy_track_row("c1", legacy_track("-T1", i64::MAX, None));
        assert!(matches!(result, Err(SyncError::LegacyUnavailable(_))));
    }

    #[test]
    fn test_legacy_channel_row_falls_back_to_created_at() {
        let created = Utc.with_ymd_and_hms(2017, 3, 1, 0, 0, 0).unwrap();
        let row = legacy_channel_row(LegacyChannel {
            firebase_id: "-F1".to_string(),
            slug: "oldies".to_string(),
            name: Some("Oldies".to_string()),
            description: None,
            image: Some("img".to_string()),
            created_at: created,
            updated_at: None,
            track_count: 42,
        });

        assert_eq!(row.updated_at, created);
        assert_eq!(row.origin, Origin::Legacy("-F1".to_string()));
        assert!(!row.busy);
    }
}
