//! Staleness Detector
//!
//! Decides whether a channel's local track set lags the remote store. The
//! per-channel and batched paths gather the same evidence (checkpoint, local
//! track stats, remote latest update) and hand it to [`is_stale`], so they
//! cannot disagree on any channel.
//!
//! Failures fail toward "needs sync": a skipped real update costs more than a
//! redundant pull.

use chrono::{DateTime, Duration, Utc};
use r4_common::db::{Channel, Origin, TrackStats};
use r4_common::time::truncate_to_seconds;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::db::{channels, tracks};
use crate::error::{SyncError, SyncResult};
use crate::services::remote_gateway::RemoteGateway;

/// True when `remote` is later than `local` by more than `tolerance`.
/// Sub-second parts are ignored on both sides.
pub fn exceeds_tolerance(remote: DateTime<Utc>, local: DateTime<Utc>, tolerance: Duration) -> bool {
    truncate_to_seconds(remote) - truncate_to_seconds(local) > tolerance
}

/// Staleness rule shared by every detection path
///
/// - Live, never checkpointed: stale.
/// - Live, no remote tracks: up to date.
/// - Live, remote tracks but none locally: stale.
/// - Live, both present: stale when remote leads by more than the tolerance.
/// - Legacy: the archive is frozen, so stale only until the first import
///   (no checkpoint and no local tracks).
pub fn is_stale(
    channel: &Channel,
    local: &TrackStats,
    remote_latest: Option<DateTime<Utc>>,
    tolerance: Duration,
) -> bool {
    match &channel.origin {
        Origin::Legacy(_) => channel.tracks_synced_at.is_none() && local.count == 0,
        Origin::Live => {
            if channel.tracks_synced_at.is_none() {
                return true;
            }
            match (remote_latest, local.latest_updated_at) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(remote), Some(local)) => exceeds_tolerance(remote, local, tolerance),
            }
        }
    }
}

/// Only checkpointed live channels need the remote timestamp
fn needs_remote_lookup(channel: &Channel) -> bool {
    matches!(channel.origin, Origin::Live) && channel.tracks_synced_at.is_some()
}

pub struct StalenessDetector {
    pool: SqlitePool,
    remote: Arc<dyn RemoteGateway>,
    tolerance: Duration,
}

impl StalenessDetector {
    pub fn new(pool: SqlitePool, remote: Arc<dyn RemoteGateway>, tolerance_secs: i64) -> Self {
        Self {
            pool,
            remote,
            tolerance: Duration::seconds(tolerance_secs),
        }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Whether the channel with `slug` needs a track pull
    ///
    /// An unknown slug is `NotFound`; any other failure answers `true`.
    pub async fn needs_update(&self, slug: &str) -> SyncResult<bool> {
        let channel = match channels::find_by_slug(&self.pool, slug).await {
            Ok(Some(channel)) => channel,
            Ok(None) => return Err(SyncError::NotFound(format!("channel '{}'", slug))),
            Err(e) => {
                tracing::warn!(slug = %slug, error = %e, "Channel lookup failed, assuming stale");
                return Ok(true);
            }
        };

        Ok(self.needs_update_channel(&channel).await)
    }

    /// Per-channel check for an already loaded row
    pub async fn needs_update_channel(&self, channel: &Channel) -> bool {
        match self.check_channel(channel).await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::warn!(
                    slug = %channel.slug,
                    error = %e,
                    "Staleness check failed, assuming stale"
                );
                true
            }
        }
    }

    async fn check_channel(&self, channel: &Channel) -> SyncResult<bool> {
        let local = tracks::track_stats(&self.pool, &channel.id).await?;

        let remote_latest = if needs_remote_lookup(channel) {
            self.remote.latest_track_update(&channel.id).await?
        } else {
            None
        };

        let stale = is_stale(channel, &local, remote_latest, self.tolerance);
        tracing::debug!(
            slug = %channel.slug,
            local_tracks = local.count,
            local_latest = ?local.latest_updated_at,
            remote_latest = ?remote_latest,
            stale,
            "Staleness check"
        );
        Ok(stale)
    }

    /// Ids from `channel_ids` that need a track pull
    ///
    /// Same membership as [`Self::needs_update`] per id, using one grouped local
    /// query and at most one remote round trip. Ids unknown locally are
    /// included; any failure returns the whole input set.
    pub async fn needs_update_batch(&self, channel_ids: &[String]) -> HashSet<String> {
        match self.check_batch(channel_ids).await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::warn!(
                    channels = channel_ids.len(),
                    error = %e,
                    "Batched staleness check failed, assuming all stale"
                );
                channel_ids.iter().cloned().collect()
            }
        }
    }

    async fn check_batch(&self, channel_ids: &[String]) -> SyncResult<HashSet<String>> {
        if channel_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let known: HashMap<String, Channel> = channels::find_by_ids(&self.pool, channel_ids)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let local_stats = tracks::track_stats_grouped(&self.pool, channel_ids).await?;

        let remote_ids: Vec<String> = known
            .values()
            .filter(|c| needs_remote_lookup(c))
            .map(|c| c.id.clone())
            .collect();
        let remote_latest = if remote_ids.is_empty() {
            HashMap::new()
        } else {
            self.remote.latest_track_updates(&remote_ids).await?
        };

        let no_tracks = TrackStats::default();
        let stale: HashSet<String> = channel_ids
            .iter()
            .filter(|id| match known.get(id.as_str()) {
                Some(channel) => is_stale(
                    channel,
                    local_stats.get(id.as_str()).unwrap_or(&no_tracks),
                    remote_latest.get(id.as_str()).copied(),
                    self.tolerance,
                ),
                None => true,
            })
            .cloned()
            .collect();

        tracing::debug!(
            checked = channel_ids.len(),
            remote_lookups = remote_ids.len(),
            stale = stale.len(),
            "Batched staleness check"
        );
        Ok(stale)
    }
}
