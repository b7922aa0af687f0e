//! Channel persistence
//!
//! Live channels are keyed by the remote id; legacy channels never overwrite an
//! existing slug. Busy and checkpoint columns are only touched by the pull
//! lifecycle functions at the bottom of this module.

use chrono::{DateTime, Utc};
use r4_common::db::{Channel, Origin};
use r4_common::time::{parse_db_timestamp, parse_optional_db_timestamp, to_db_timestamp};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;

use crate::error::{SyncError, SyncResult};

const CHANNEL_COLUMNS: &str = "id, slug, name, description, image, created_at, updated_at, \
                               legacy_origin_id, tracks_synced_at, busy";

fn channel_from_row(row: &SqliteRow) -> SyncResult<Channel> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let tracks_synced_at: Option<String> = row.get("tracks_synced_at");
    let busy: i64 = row.get("busy");

    Ok(Channel {
        id: row.get("id"),
        slug: row.get("slug"),
        name: row.get("name"),
        description: row.get("description"),
        image: row.get("image"),
        created_at: parse_db_timestamp(&created_at)?,
        updated_at: parse_db_timestamp(&updated_at)?,
        origin: Origin::from_legacy_id(row.get("legacy_origin_id")),
        tracks_synced_at: parse_optional_db_timestamp(tracks_synced_at)?,
        busy: busy != 0,
    })
}

fn channels_from_rows(rows: Vec<SqliteRow>) -> SyncResult<Vec<Channel>> {
    rows.iter().map(channel_from_row).collect()
}

/// Upsert live channel metadata in one transaction
///
/// A legacy row holding the same slug is removed first, together with its tracks.
/// A live row holding it (the remote renamed or swapped slugs) keeps its id,
/// tracks and checkpoint; its slug is parked as `<slug>~<id>` until its own
/// upsert, in this batch or a later one, restores the remote value. Checkpoint
/// and busy columns of an existing row are left as they are.
pub async fn upsert_live_channels(pool: &SqlitePool, channels: &[Channel]) -> SyncResult<usize> {
    let mut tx = pool.begin().await.map_err(SyncError::LocalWriteFailed)?;
    let mut replaced = 0u64;
    let mut parked = 0u64;

    for channel in channels {
        replaced += sqlx::query(
            "DELETE FROM channels WHERE slug = ? AND id != ? AND legacy_origin_id IS NOT NULL",
        )
        .bind(&channel.slug)
        .bind(&channel.id)
        .execute(&mut *tx)
        .await
        .map_err(SyncError::LocalWriteFailed)?
        .rows_affected();

        parked += sqlx::query(
            "UPDATE channels SET slug = slug || '~' || id \
             WHERE slug = ? AND id != ? AND legacy_origin_id IS NULL",
        )
        .bind(&channel.slug)
        .bind(&channel.id)
        .execute(&mut *tx)
        .await
        .map_err(SyncError::LocalWriteFailed)?
        .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO channels (id, slug, name, description, image, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                name = excluded.name,
                description = excluded.description,
                image = excluded.image,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&channel.id)
        .bind(&channel.slug)
        .bind(&channel.name)
        .bind(&channel.description)
        .bind(&channel.image)
        .bind(to_db_timestamp(&channel.created_at))
        .bind(to_db_timestamp(&channel.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(SyncError::LocalWriteFailed)?;
    }

    tx.commit().await.map_err(SyncError::LocalWriteFailed)?;

    if replaced > 0 {
        tracing::info!(replaced, "Live channels replaced legacy rows holding their slugs");
    }
    if parked > 0 {
        tracing::debug!(parked, "Moved live channels off slugs taken by a rename");
    }

    Ok(channels.len())
}

/// Insert legacy channels that do not collide with any existing row
///
/// Returns the number of rows actually inserted.
pub async fn insert_legacy_channels(pool: &SqlitePool, channels: &[Channel]) -> SyncResult<usize> {
    let mut tx = pool.begin().await.map_err(SyncError::LocalWriteFailed)?;
    let mut inserted = 0u64;

    for channel in channels {
        let Some(legacy_id) = channel.origin.legacy_id() else {
            tracing::warn!(slug = %channel.slug, "Skipping live channel passed to legacy insert");
            continue;
        };

        inserted += sqlx::query(
            r#"
            INSERT INTO channels (id, slug, name, description, image, created_at, updated_at, legacy_origin_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&channel.id)
        .bind(&channel.slug)
        .bind(&channel.name)
        .bind(&channel.description)
        .bind(&channel.image)
        .bind(to_db_timestamp(&channel.created_at))
        .bind(to_db_timestamp(&channel.updated_at))
        .bind(legacy_id)
        .execute(&mut *tx)
        .await
        .map_err(SyncError::LocalWriteFailed)?
        .rows_affected();
    }

    tx.commit().await.map_err(SyncError::LocalWriteFailed)?;

    Ok(inserted as usize)
}

/// All slugs currently in the store, regardless of origin
pub async fn list_slugs(pool: &SqlitePool) -> SyncResult<HashSet<String>> {
    let slugs: Vec<String> = sqlx::query_scalar("SELECT slug FROM channels")
        .fetch_all(pool)
        .await?;
    Ok(slugs.into_iter().collect())
}

pub async fn find_by_slug(pool: &SqlitePool, slug: &str) -> SyncResult<Option<Channel>> {
    let sql = format!("SELECT {} FROM channels WHERE slug = ?", CHANNEL_COLUMNS);
    let row = sqlx::query(&sql).bind(slug).fetch_optional(pool).await?;

    row.as_ref().map(channel_from_row).transpose()
}

/// Channels for the given ids; unknown ids are simply absent
pub async fn find_by_ids(pool: &SqlitePool, ids: &[String]) -> SyncResult<Vec<Channel>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM channels WHERE id IN (", CHANNEL_COLUMNS));
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");

    let rows = query.build().fetch_all(pool).await?;
    channels_from_rows(rows)
}

/// Every channel, newest first
pub async fn list_channels(pool: &SqlitePool) -> SyncResult<Vec<Channel>> {
    let sql = format!(
        "SELECT {} FROM channels ORDER BY created_at DESC, slug",
        CHANNEL_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    channels_from_rows(rows)
}

/// Channels whose authoritative copy is remote
pub async fn list_live_channels(pool: &SqlitePool) -> SyncResult<Vec<Channel>> {
    let sql = format!(
        "SELECT {} FROM channels WHERE legacy_origin_id IS NULL ORDER BY created_at DESC, slug",
        CHANNEL_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    channels_from_rows(rows)
}

/// Set `busy` if it is currently clear
///
/// Returns false when the channel is already in flight (or does not exist).
pub async fn try_mark_busy(pool: &SqlitePool, channel_id: &str) -> SyncResult<bool> {
    let result = sqlx::query("UPDATE channels SET busy = 1 WHERE id = ? AND busy = 0")
        .bind(channel_id)
        .execute(pool)
        .await
        .map_err(SyncError::LocalWriteFailed)?;

    Ok(result.rows_affected() == 1)
}

/// End a pull: clear `busy`, and advance the checkpoint only when given one
pub async fn finish_pull(
    pool: &SqlitePool,
    channel_id: &str,
    checkpoint: Option<DateTime<Utc>>,
) -> SyncResult<()> {
    let query = match checkpoint {
        Some(ts) => sqlx::query("UPDATE channels SET busy = 0, tracks_synced_at = ? WHERE id = ?")
            .bind(to_db_timestamp(&ts))
            .bind(channel_id),
        None => sqlx::query("UPDATE channels SET busy = 0 WHERE id = ?").bind(channel_id),
    };

    query
        .execute(pool)
        .await
        .map_err(SyncError::LocalWriteFailed)?;

    Ok(())
}

/// Clear every busy flag (a previous process may have died mid-pull)
pub async fn clear_busy_flags(pool: &SqlitePool) -> SyncResult<u64> {
    let result = sqlx::query("UPDATE channels SET busy = 0 WHERE busy != 0")
        .execute(pool)
        .await
        .map_err(SyncError::LocalWriteFailed)?;

    Ok(result.rows_affected())
}
