//! HTTP clients against a local stand-in server
//!
//! The server mimics the PostgREST remote store and the legacy archive just
//! enough to check request shapes and response decoding.

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use r4_sync::services::{
    GatewayError, HttpLegacyArchive, HttpRemoteGateway, LegacyArchive, LegacyError,
    RemoteGateway, SnapshotSource,
};
use serde_json::{json, Value};
use std::collections::HashMap;

const API_KEY: &str = "test-key";

async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn authorized(headers: &HeaderMap) -> bool {
    let apikey = headers.get("apikey").and_then(|v| v.to_str().ok());
    let bearer = headers.get("authorization").and_then(|v| v.to_str().ok());
    apikey == Some(API_KEY) && bearer == Some("Bearer test-key")
}

async fn channels(
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    assert_eq!(params.get("order").map(String::as_str), Some("created_at.desc"));
    assert!(params.get("select").unwrap().contains("slug"));
    let limit: usize = params.get("limit").unwrap().parse().unwrap();

    let all = json!([
        {"id": "c2", "slug": "beta", "name": "Beta", "description": null, "image": null,
         "created_at": "2024-02-01T00:00:00+00:00", "updated_at": "2024-02-02T00:00:00+00:00"},
        {"id": "c1", "slug": "alpha", "name": "Alpha", "description": "first", "image": "a.jpg",
         "created_at": "2024-01-01T00:00:00+00:00", "updated_at": "2024-01-05T10:00:00.250+00:00"}
    ]);
    let taken: Vec<Value> = all.as_array().unwrap().iter().take(limit).cloned().collect();
    Ok(Json(Value::Array(taken)))
}

async fn channel_tracks(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    match params.get("slug").map(String::as_str) {
        Some("eq.alpha") => Json(json!([
            {"id": "t2", "url": "https://b", "title": "B", "description": null, "discogs_url": null,
             "created_at": "2024-01-03T00:00:00+00:00", "updated_at": "2024-01-03T00:00:00+00:00"},
            {"id": "t1", "url": "https://a", "title": "A", "description": "x", "discogs_url": "https://d",
             "created_at": "2024-01-02T00:00:00+00:00", "updated_at": "2024-01-04T00:00:00+00:00"}
        ])),
        _ => Json(json!([])),
    }
}

async fn channel_track(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    assert_eq!(params.get("select").map(String::as_str), Some("updated_at"));
    assert_eq!(params.get("order").map(String::as_str), Some("updated_at.desc"));
    assert_eq!(params.get("limit").map(String::as_str), Some("1"));
    match params.get("channel_id").map(String::as_str) {
        Some("eq.c1") => Json(json!([{"updated_at": "2024-01-04T00:00:00+00:00"}])),
        _ => Json(json!([])),
    }
}

async fn latest_track_updates(Json(body): Json<Value>) -> Json<Value> {
    let ids: Vec<String> = serde_json::from_value(body["channel_ids"].clone()).unwrap();
    let rows: Vec<Value> = ids
        .iter()
        .filter_map(|id| match id.as_str() {
            "c1" => Some(json!({"channel_id": "c1", "updated_at": "2024-01-04T00:00:00+00:00"})),
            "c2" => Some(json!({"channel_id": "c2", "updated_at": null})),
            _ => None,
        })
        .collect();
    Json(Value::Array(rows))
}

async fn remote_server() -> String {
    let app = Router::new()
        .route("/rest/v1/channels", get(channels))
        .route("/rest/v1/channel_tracks", get(channel_tracks))
        .route("/rest/v1/channel_track", get(channel_track))
        .route("/rest/v1/rpc/latest_track_updates", post(latest_track_updates));
    spawn_server(app).await
}

#[tokio::test]
async fn test_list_channels_sends_auth_and_limit() {
    let base = remote_server().await;
    let gateway = HttpRemoteGateway::new(format!("{}/", base), Some(API_KEY.to_string())).unwrap();

    let channels = gateway.list_channels(1).await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].slug, "beta");

    let channels = gateway.list_channels(10).await.unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[1].description.as_deref(), Some("first"));
}

#[tokio::test]
async fn test_missing_key_is_api_error() {
    let base = remote_server().await;
    let gateway = HttpRemoteGateway::new(base, None).unwrap();

    let result = gateway.list_channels(10).await;
    assert!(matches!(result, Err(GatewayError::Api(401, _))));
}

#[tokio::test]
async fn test_list_tracks_by_slug() {
    let base = remote_server().await;
    let gateway = HttpRemoteGateway::new(base, Some(API_KEY.to_string())).unwrap();

    let tracks = gateway.list_tracks("alpha").await.unwrap();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[1].discogs_url.as_deref(), Some("https://d"));

    assert!(gateway.list_tracks("nobody").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_latest_track_update_single_and_batched() {
    let base = remote_server().await;
    let gateway = HttpRemoteGateway::new(base, Some(API_KEY.to_string())).unwrap();

    let latest = gateway.latest_track_update("c1").await.unwrap();
    assert_eq!(latest.unwrap().to_rfc3339(), "2024-01-04T00:00:00+00:00");
    assert_eq!(gateway.latest_track_update("c2").await.unwrap(), None);

    let batched = gateway
        .latest_track_updates(&["c1".to_string(), "c2".to_string(), "c9".to_string()])
        .await
        .unwrap();
    assert_eq!(batched.len(), 1);
    assert_eq!(batched.get("c1").copied(), latest);
}

#[tokio::test]
async fn test_unreachable_remote_is_network_error() {
    let gateway = HttpRemoteGateway::new("http://127.0.0.1:9", None).unwrap();
    let result = gateway.list_tracks("alpha").await;
    assert!(matches!(result, Err(GatewayError::Network(_))));
}

async fn legacy_tracks(Query(params): Query<HashMap<String, String>>) -> (StatusCode, String) {
    assert_eq!(params.get("orderBy").map(String::as_str), Some("\"channel\""));
    assert_eq!(params.get("startAt"), params.get("endAt"));
    match params.get("startAt").map(String::as_str) {
        Some("\"-F1\"") => (
            StatusCode::OK,
            json!({
                "-T2": {"url": "https://b", "title": "B", "created": 2000, "channel": "-F1"},
                "-T1": {"url": "https://a", "title": "A", "body": "hi", "created": 1000, "updated": 1500, "channel": "-F1"}
            })
            .to_string(),
        ),
        Some("\"-BROKEN\"") => (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string()),
        _ => (StatusCode::OK, "null".to_string()),
    }
}

async fn legacy_snapshot() -> Json<Value> {
    Json(json!([
        {"firebase_id": "-F1", "slug": "oldies", "name": "Oldies", "image": "o.png",
         "created_at": "2016-05-01T00:00:00.000Z", "updated_at": "2017-01-01T00:00:00.000Z", "track_count": 40},
        {"firebase_id": "-F2", "slug": "quiet", "created_at": "2016-06-01T00:00:00.000Z", "track_count": 0}
    ]))
}

async fn legacy_server() -> String {
    let app = Router::new()
        .route("/tracks.json", get(legacy_tracks))
        .route("/r5-channels.json", get(legacy_snapshot));
    spawn_server(app).await
}

#[tokio::test]
async fn test_legacy_snapshot_over_http() {
    let base = legacy_server().await;
    let archive = HttpLegacyArchive::new(
        SnapshotSource::parse(&format!("{}/r5-channels.json", base)),
        base.clone(),
        10,
    )
    .unwrap();

    let channels = archive.list_legacy_channels().await.unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].track_count, 40);
    assert_eq!(channels[1].image, None);
}

#[tokio::test]
async fn test_legacy_tracks_lookup() {
    let base = legacy_server().await;
    let archive = HttpLegacyArchive::new(
        SnapshotSource::parse(&format!("{}/r5-channels.json", base)),
        format!("{}/", base),
        10,
    )
    .unwrap();

    let mut tracks = archive.list_legacy_tracks("-F1").await.unwrap();
    tracks.sort_by_key(|t| t.created);
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].id, "-T1");
    assert_eq!(tracks[0].body.as_deref(), Some("hi"));
    assert_eq!(tracks[0].updated, Some(1500));

    assert!(archive.list_legacy_tracks("-EMPTY").await.unwrap().is_empty());

    let broken = archive.list_legacy_tracks("-BROKEN").await;
    assert!(matches!(broken, Err(LegacyError::Api(500, _))));
}
