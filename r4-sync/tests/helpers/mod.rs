//! Shared fixtures for r4-sync integration tests
//!
//! In-process fakes for the remote store and the legacy archive, plus an
//! in-memory local store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use r4_common::config::SyncSettings;
use r4_common::events::EventBus;
use r4_sync::services::{
    GatewayError, LegacyArchive, LegacyChannel, LegacyError, LegacyTrack, Puller, RemoteChannel,
    RemoteGateway, RemoteTrack,
};
use r4_sync::SyncEngine;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fixed reference time for remote data
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Single-connection in-memory store with the full schema
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();

    r4_common::db::create_schema(&pool).await.unwrap();
    pool
}

pub fn remote_channel(id: &str, slug: &str) -> RemoteChannel {
    RemoteChannel {
        id: id.to_string(),
        slug: slug.to_string(),
        name: Some(format!("{} radio", slug)),
        description: None,
        image: Some(format!("{}.jpg", slug)),
        created_at: base_time() - Duration::days(30),
        updated_at: base_time() - Duration::days(1),
    }
}

/// `count` tracks created one minute apart, ids `<prefix>-<n>`
pub fn remote_tracks(prefix: &str, count: usize) -> Vec<RemoteTrack> {
    (0..count)
        .map(|n| {
            let ts = base_time() + Duration::minutes(n as i64);
            RemoteTrack {
                id: format!("{}-{}", prefix, n),
                url: format!("https://www.youtube.com/watch?v={}{}", prefix, n),
                title: format!("{} track {}", prefix, n),
                description: None,
                discogs_url: None,
                created_at: ts,
                updated_at: ts,
            }
        })
        .collect()
}

pub fn legacy_channel(firebase_id: &str, slug: &str, track_count: u32) -> LegacyChannel {
    LegacyChannel {
        firebase_id: firebase_id.to_string(),
        slug: slug.to_string(),
        name: Some(slug.to_string()),
        description: None,
        image: Some(format!("{}.png", slug)),
        created_at: base_time() - Duration::days(2000),
        updated_at: None,
        track_count,
    }
}

pub fn legacy_track(id: &str, created_ms: i64) -> LegacyTrack {
    LegacyTrack {
        id: id.to_string(),
        url: format!("https://www.youtube.com/watch?v={}", id),
        title: format!("legacy {}", id),
        body: None,
        discogs_url: None,
        created: created_ms,
        updated: None,
    }
}

/// Remote store fake keyed by slug
#[derive(Default)]
pub struct FakeRemote {
    channels: Mutex<Vec<RemoteChannel>>,
    tracks: Mutex<HashMap<String, Vec<RemoteTrack>>>,
    failing_slugs: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
    calls: Mutex<Vec<String>>,
    list_delay_ms: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, channel: RemoteChannel, tracks: Vec<RemoteTrack>) {
        self.tracks
            .lock()
            .unwrap()
            .insert(channel.slug.clone(), tracks);
        self.channels.lock().unwrap().push(channel);
    }

    pub fn set_tracks(&self, slug: &str, tracks: Vec<RemoteTrack>) {
        self.tracks.lock().unwrap().insert(slug.to_string(), tracks);
    }

    /// Make `list_tracks` fail for `slug`
    pub fn fail_slug(&self, slug: &str) {
        self.failing_slugs.lock().unwrap().insert(slug.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_slugs.lock().unwrap().clear();
    }

    /// Make every call fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Hold every `list_tracks` call open for `millis`
    pub fn set_list_delay_ms(&self, millis: u64) {
        self.list_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Most `list_tracks` calls seen running at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(':').next() == Some(method))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: String) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(call);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("connection refused".to_string()));
        }
        Ok(())
    }

    fn latest_for_id(&self, channel_id: &str) -> Option<DateTime<Utc>> {
        let slug = self
            .channels
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == channel_id)
            .map(|c| c.slug.clone())?;
        self.tracks
            .lock()
            .unwrap()
            .get(&slug)
            .and_then(|tracks| tracks.iter().map(|t| t.updated_at).max())
    }
}

#[async_trait]
impl RemoteGateway for FakeRemote {
    async fn list_channels(&self, limit: usize) -> Result<Vec<RemoteChannel>, GatewayError> {
        self.record(format!("list_channels:{}", limit))?;
        Ok(self.channels.lock().unwrap().iter().take(limit).cloned().collect())
    }

    async fn list_tracks(&self, channel_slug: &str) -> Result<Vec<RemoteTrack>, GatewayError> {
        self.record(format!("list_tracks:{}", channel_slug))?;

        let delay = self.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        if self.failing_slugs.lock().unwrap().contains(channel_slug) {
            return Err(GatewayError::Api(503, format!("{} unavailable", channel_slug)));
        }
        Ok(self
            .tracks
            .lock()
            .unwrap()
            .get(channel_slug)
            .cloned()
            .unwrap_or_default())
    }

    async fn latest_track_update(
        &self,
        channel_id: &str,
    ) -> Result<Option<DateTime<Utc>>, GatewayError> {
        self.record(format!("latest_track_update:{}", channel_id))?;
        Ok(self.latest_for_id(channel_id))
    }

    async fn latest_track_updates(
        &self,
        channel_ids: &[String],
    ) -> Result<HashMap<String, DateTime<Utc>>, GatewayError> {
        self.record(format!("latest_track_updates:{}", channel_ids.len()))?;
        Ok(channel_ids
            .iter()
            .filter_map(|id| self.latest_for_id(id).map(|ts| (id.clone(), ts)))
            .collect())
    }
}

/// Legacy archive fake keyed by legacy channel id
#[derive(Default)]
pub struct FakeLegacy {
    channels: Mutex<Vec<LegacyChannel>>,
    tracks: Mutex<HashMap<String, Vec<LegacyTrack>>>,
    unavailable: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl FakeLegacy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, channel: LegacyChannel, tracks: Vec<LegacyTrack>) {
        self.tracks
            .lock()
            .unwrap()
            .insert(channel.firebase_id.clone(), tracks);
        self.channels.lock().unwrap().push(channel);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), LegacyError> {
        self.calls.lock().unwrap().push(call);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LegacyError::Network("archive offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LegacyArchive for FakeLegacy {
    async fn list_legacy_channels(&self) -> Result<Vec<LegacyChannel>, LegacyError> {
        self.record("list_legacy_channels".to_string())?;
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn list_legacy_tracks(
        &self,
        legacy_channel_id: &str,
    ) -> Result<Vec<LegacyTrack>, LegacyError> {
        self.record(format!("list_legacy_tracks:{}", legacy_channel_id))?;
        Ok(self
            .tracks
            .lock()
            .unwrap()
            .get(legacy_channel_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Everything a test needs to drive the engine and inspect its effects
pub struct Harness {
    pub pool: SqlitePool,
    pub remote: Arc<FakeRemote>,
    pub legacy: Arc<FakeLegacy>,
    pub event_bus: EventBus,
    pub settings: SyncSettings,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(SyncSettings::default()).await
    }

    pub async fn with_settings(settings: SyncSettings) -> Self {
        Self {
            pool: memory_pool().await,
            remote: Arc::new(FakeRemote::new()),
            legacy: Arc::new(FakeLegacy::new()),
            event_bus: EventBus::new(1024),
            settings,
        }
    }

    pub async fn engine(&self) -> SyncEngine {
        SyncEngine::new(
            self.pool.clone(),
            self.remote.clone(),
            self.legacy.clone(),
            self.settings.clone(),
            self.event_bus.clone(),
        )
        .await
        .unwrap()
    }

    pub fn puller(&self) -> Puller {
        Puller::new(
            self.pool.clone(),
            self.remote.clone(),
            self.legacy.clone(),
            self.settings.clone(),
            self.event_bus.clone(),
        )
    }

    pub async fn channel(&self, slug: &str) -> r4_common::db::Channel {
        r4_sync::db::channels::find_by_slug(&self.pool, slug)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("channel {} missing", slug))
    }

    pub async fn track_count(&self, slug: &str) -> i64 {
        let channel = self.channel(slug).await;
        r4_sync::db::tracks::track_stats(&self.pool, &channel.id)
            .await
            .unwrap()
            .count
    }
}
