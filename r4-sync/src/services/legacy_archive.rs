//! Legacy Archive Reader
//!
//! Read-only access to the frozen legacy dataset:
//! - a bulk snapshot enumerating legacy channels (URL or local JSON file)
//! - a per-channel REST lookup for legacy tracks
//!
//! The track lookup is not ordered by the archive; callers sort before inserting.
//! Import filtering (image present, minimum track count) is also the caller's job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("r4-sync/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Legacy archive errors
#[derive(Debug, Error)]
pub enum LegacyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Snapshot read failed: {0}")]
    Snapshot(#[from] std::io::Error),
}

/// Channel entry of the bulk snapshot
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacyChannel {
    /// Archive-issued id
    #[serde(alias = "id")]
    pub firebase_id: String,
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub track_count: u32,
}

/// Track from the per-channel lookup
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyTrack {
    /// Archive-issued id (object key in the lookup response)
    pub id: String,
    pub url: String,
    pub title: String,
    pub body: Option<String>,
    pub discogs_url: Option<String>,
    /// Epoch milliseconds
    pub created: i64,
    /// Epoch milliseconds
    pub updated: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ArchivedTrack {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default, rename = "discogsUrl")]
    discogs_url: Option<String>,
    created: i64,
    #[serde(default)]
    updated: Option<i64>,
}

/// Read-only access to the legacy archive
#[async_trait]
pub trait LegacyArchive: Send + Sync {
    /// All legacy channels from the bulk snapshot, capped at the import limit
    async fn list_legacy_channels(&self) -> Result<Vec<LegacyChannel>, LegacyError>;

    /// Tracks of one legacy channel, in whatever order the archive returns them
    async fn list_legacy_tracks(
        &self,
        legacy_channel_id: &str,
    ) -> Result<Vec<LegacyTrack>, LegacyError>;
}

/// Where the bulk snapshot lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    Url(String),
    File(PathBuf),
}

impl SnapshotSource {
    pub fn parse(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            SnapshotSource::Url(value.to_string())
        } else {
            SnapshotSource::File(PathBuf::from(value))
        }
    }
}

/// Legacy archive over HTTP (snapshot may also be a local file)
pub struct HttpLegacyArchive {
    http_client: reqwest::Client,
    snapshot: SnapshotSource,
    tracks_base_url: String,
    limit: usize,
}

impl HttpLegacyArchive {
    pub fn new(
        snapshot: SnapshotSource,
        tracks_base_url: impl Into<String>,
        limit: usize,
    ) -> Result<Self, LegacyError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LegacyError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            snapshot,
            tracks_base_url: tracks_base_url.into().trim_end_matches('/').to_string(),
            limit,
        })
    }

    async fn read_snapshot(&self) -> Result<Vec<u8>, LegacyError> {
        match &self.snapshot {
            SnapshotSource::File(path) => {
                tracing::debug!(path = %path.display(), "Reading legacy snapshot file");
                Ok(tokio::fs::read(path).await?)
            }
            SnapshotSource::Url(url) => {
                tracing::debug!(url = %url, "Fetching legacy snapshot");
                let response = self
                    .http_client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| LegacyError::Network(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(LegacyError::Api(status.as_u16(), error_text));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| LegacyError::Network(e.to_string()))?;
                Ok(bytes.to_vec())
            }
        }
    }
}

#[async_trait]
impl LegacyArchive for HttpLegacyArchive {
    async fn list_legacy_channels(&self) -> Result<Vec<LegacyChannel>, LegacyError> {
        let raw = self.read_snapshot().await?;
        let mut channels: Vec<LegacyChannel> =
            serde_json::from_slice(&raw).map_err(|e| LegacyError::Parse(e.to_string()))?;
        channels.truncate(self.limit);

        tracing::info!(count = channels.len(), limit = self.limit, "Loaded legacy snapshot");
        Ok(channels)
    }

    async fn list_legacy_tracks(
        &self,
        legacy_channel_id: &str,
    ) -> Result<Vec<LegacyTrack>, LegacyError> {
        let url = format!("{}/tracks.json", self.tracks_base_url);
        let quoted = format!("\"{}\"", legacy_channel_id);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("orderBy", "\"channel\"".to_string()),
                ("startAt", quoted.clone()),
                ("endAt", quoted),
            ])
            .send()
            .await
            .map_err(|e| LegacyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LegacyError::Api(status.as_u16(), error_text));
        }

        // The archive answers `null` for a channel without tracks
        let tracks: Option<HashMap<String, ArchivedTrack>> = response
            .json()
            .await
            .map_err(|e| LegacyError::Parse(e.to_string()))?;

        let tracks = into_legacy_tracks(tracks.unwrap_or_default());
        tracing::debug!(
            legacy_id = %legacy_channel_id,
            count = tracks.len(),
            "Retrieved legacy tracks"
        );
        Ok(tracks)
    }
}

fn into_legacy_tracks(tracks: HashMap<String, ArchivedTrack>) -> Vec<LegacyTrack> {
    tracks
        .into_iter()
        .map(|(id, track)| LegacyTrack {
            id,
            url: track.url,
            title: track.title,
            body: track.body,
            discogs_url: track.discogs_url,
            created: track.created,
            updated: track.updated,
        })
        .collect()
}
