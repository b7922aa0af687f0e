//! Remote Gateway
//!
//! Read-only queries against the authoritative remote store. Errors are returned
//! uninterpreted; callers decide whether a failure means "skip" or "assume stale".
//!
//! [`HttpRemoteGateway`] talks to a PostgREST-style HTTP endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("r4-sync/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

const CHANNEL_COLUMNS: &str = "id,slug,name,description,image,created_at,updated_at";
const TRACK_COLUMNS: &str = "id,url,title,description,discogs_url,created_at,updated_at";

/// Remote gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Channel as returned by the remote store
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteChannel {
    pub id: String,
    pub slug: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Track as returned by the remote store
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteTrack {
    pub id: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub discogs_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Query interface to the authoritative remote store
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Up to `limit` channels
    async fn list_channels(&self, limit: usize) -> Result<Vec<RemoteChannel>, GatewayError>;

    /// Full, unordered track set of one channel
    async fn list_tracks(&self, channel_slug: &str) -> Result<Vec<RemoteTrack>, GatewayError>;

    /// Most recent track `updated_at` of a channel; `None` if it has no tracks
    async fn latest_track_update(
        &self,
        channel_id: &str,
    ) -> Result<Option<DateTime<Utc>>, GatewayError>;

    /// Batched form of [`Self::latest_track_update`] in one round trip.
    /// Channels without tracks are absent from the map.
    async fn latest_track_updates(
        &self,
        channel_ids: &[String],
    ) -> Result<HashMap<String, DateTime<Utc>>, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct UpdatedAtRow {
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ChannelUpdatedAtRow {
    channel_id: String,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct LatestUpdatesRequest<'a> {
    channel_ids: &'a [String],
}

/// HTTP client for a PostgREST-style remote store
pub struct HttpRemoteGateway {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRemoteGateway {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let url = self.rest_url(path);
        tracing::debug!(url = %url, "Querying remote store");

        let request = self.authorize(self.http_client.get(&url).query(query));
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))
    }
}

#[async_trait]
impl RemoteGateway for HttpRemoteGateway {
    async fn list_channels(&self, limit: usize) -> Result<Vec<RemoteChannel>, GatewayError> {
        let channels: Vec<RemoteChannel> = self
            .get_json(
                "channels",
                &[
                    ("select", CHANNEL_COLUMNS.to_string()),
                    ("order", "created_at.desc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        tracing::info!(count = channels.len(), limit, "Retrieved channels from remote store");
        Ok(channels)
    }

    async fn list_tracks(&self, channel_slug: &str) -> Result<Vec<RemoteTrack>, GatewayError> {
        let tracks: Vec<RemoteTrack> = self
            .get_json(
                "channel_tracks",
                &[
                    ("select", TRACK_COLUMNS.to_string()),
                    ("slug", format!("eq.{}", channel_slug)),
                ],
            )
            .await?;

        tracing::debug!(slug = %channel_slug, count = tracks.len(), "Retrieved remote tracks");
        Ok(tracks)
    }

    async fn latest_track_update(
        &self,
        channel_id: &str,
    ) -> Result<Option<DateTime<Utc>>, GatewayError> {
        let rows: Vec<UpdatedAtRow> = self
            .get_json(
                "channel_track",
                &[
                    ("select", "updated_at".to_string()),
                    ("channel_id", format!("eq.{}", channel_id)),
                    ("order", "updated_at.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        Ok(rows.into_iter().next().map(|row| row.updated_at))
    }

    async fn latest_track_updates(
        &self,
        channel_ids: &[String],
    ) -> Result<HashMap<String, DateTime<Utc>>, GatewayError> {
        if channel_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = self.rest_url("rpc/latest_track_updates");
        tracing::debug!(url = %url, channels = channel_ids.len(), "Batched latest-update query");

        let request = self
            .authorize(self.http_client.post(&url))
            .json(&LatestUpdatesRequest { channel_ids });
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let rows: Vec<ChannelUpdatedAtRow> = Self::decode(response).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.updated_at.map(|ts| (row.channel_id, ts)))
            .collect())
    }
}
