//! Track persistence

use r4_common::db::{Track, TrackStats};
use r4_common::time::{parse_db_timestamp, parse_optional_db_timestamp, to_db_timestamp};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;

use crate::error::{SyncError, SyncResult};

fn track_from_row(row: &SqliteRow) -> SyncResult<Track> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Track {
        id: row.get("id"),
        channel_id: row.get("channel_id"),
        url: row.get("url"),
        title: row.get("title"),
        description: row.get("description"),
        discogs_url: row.get("discogs_url"),
        created_at: parse_db_timestamp(&created_at)?,
        updated_at: parse_db_timestamp(&updated_at)?,
        legacy_origin_id: row.get("legacy_origin_id"),
    })
}

/// Upsert one chunk of tracks on `conn`
///
/// The caller owns the transaction. Live tracks are keyed by `id`. Legacy tracks
/// are keyed by `legacy_origin_id`, so a re-import keeps the local id assigned
/// the first time.
pub async fn upsert_tracks(conn: &mut SqliteConnection, tracks: &[Track]) -> SyncResult<usize> {
    for track in tracks {
        let sql = if track.legacy_origin_id.is_some() {
            r#"
            INSERT INTO tracks (id, channel_id, url, title, description, discogs_url, created_at, updated_at, legacy_origin_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(legacy_origin_id) DO UPDATE SET
                url = excluded.url,
                title = excluded.title,
                description = excluded.description,
                discogs_url = excluded.discogs_url,
                updated_at = excluded.updated_at
            "#
        } else {
            r#"
            INSERT INTO tracks (id, channel_id, url, title, description, discogs_url, created_at, updated_at, legacy_origin_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                channel_id = excluded.channel_id,
                url = excluded.url,
                title = excluded.title,
                description = excluded.description,
                discogs_url = excluded.discogs_url,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#
        };

        sqlx::query(sql)
            .bind(&track.id)
            .bind(&track.channel_id)
            .bind(&track.url)
            .bind(&track.title)
            .bind(&track.description)
            .bind(&track.discogs_url)
            .bind(to_db_timestamp(&track.created_at))
            .bind(to_db_timestamp(&track.updated_at))
            .bind(&track.legacy_origin_id)
            .execute(&mut *conn)
            .await
            .map_err(SyncError::LocalWriteFailed)?;
    }

    Ok(tracks.len())
}

/// Tracks of a channel in creation order
pub async fn list_tracks(pool: &SqlitePool, channel_id: &str) -> SyncResult<Vec<Track>> {
    let rows = sqlx::query(
        r#"
        SELECT id, channel_id, url, title, description, discogs_url,
               created_at, updated_at, legacy_origin_id
        FROM tracks
        WHERE channel_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(channel_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(track_from_row).collect()
}

/// Track count and latest `updated_at` of one channel
pub async fn track_stats(pool: &SqlitePool, channel_id: &str) -> SyncResult<TrackStats> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS count, MAX(updated_at) AS latest FROM tracks WHERE channel_id = ?",
    )
    .bind(channel_id)
    .fetch_one(pool)
    .await?;

    Ok(TrackStats {
        count: row.get("count"),
        latest_updated_at: parse_optional_db_timestamp(row.get("latest"))?,
    })
}

/// [`track_stats`] for many channels in one grouped query
///
/// Channels without tracks are absent from the map.
pub async fn track_stats_grouped(
    pool: &SqlitePool,
    channel_ids: &[String],
) -> SyncResult<HashMap<String, TrackStats>> {
    if channel_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT channel_id, COUNT(*) AS count, MAX(updated_at) AS latest \
         FROM tracks WHERE channel_id IN (",
    );
    let mut separated = query.separated(", ");
    for id in channel_ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(") GROUP BY channel_id");

    let rows = query.build().fetch_all(pool).await?;

    let mut stats = HashMap::with_capacity(rows.len());
    for row in rows {
        stats.insert(
            row.get::<String, _>("channel_id"),
            TrackStats {
                count: row.get("count"),
                latest_updated_at: parse_optional_db_timestamp(row.get("latest"))?,
            },
        );
    }

    Ok(stats)
}
