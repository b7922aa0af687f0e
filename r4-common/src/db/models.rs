//! Local store row models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a channel (or track) came from
///
/// Decided once when a row is read; code paths that differ per origin match on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "legacy_id", rename_all = "snake_case")]
pub enum Origin {
    /// Authoritative copy lives in the remote store
    Live,
    /// Imported from the frozen legacy archive (carries the archive's id)
    Legacy(String),
}

impl Origin {
    pub fn from_legacy_id(legacy_origin_id: Option<String>) -> Self {
        match legacy_origin_id {
            Some(id) => Origin::Legacy(id),
            None => Origin::Live,
        }
    }

    pub fn legacy_id(&self) -> Option<&str> {
        match self {
            Origin::Live => None,
            Origin::Legacy(id) => Some(id),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Origin::Legacy(_))
    }
}

/// Channel row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub slug: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub origin: Origin,
    /// Checkpoint of the last successful full track pull; `None` until the first one
    pub tracks_synced_at: Option<DateTime<Utc>>,
    /// True only while a pull for this channel is running
    pub busy: bool,
}

/// Track row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub channel_id: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub discogs_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub legacy_origin_id: Option<String>,
}

/// Per-channel aggregate over local tracks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackStats {
    pub count: i64,
    pub latest_updated_at: Option<DateTime<Utc>>,
}
