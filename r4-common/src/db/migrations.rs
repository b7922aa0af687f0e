//! Database schema migrations
//!
//! Versioned, idempotent upgrades for local stores created by earlier releases.
//! `CREATE TABLE IF NOT EXISTS` in [`crate::db::init`] only covers fresh files; an
//! existing `channels` table from an older release may lack the sync metadata
//! columns, so each migration checks `pragma_table_info` before altering.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - users upgrade from any older version
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Use ALTER TABLE** - prefer it over DROP/CREATE to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        warn!("This may indicate a downgrade. Proceeding with caution.");
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    if current_version < 3 {
        migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
        info!("Migration v3 completed");
    }

    info!("All migrations completed successfully");
    Ok(())
}

async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?)",
    )
    .bind(table)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Add a column unless it is already present
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    let has_column: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;

    if has_column > 0 {
        info!("  {}.{} already exists - skipping", table, column);
        return Ok(());
    }

    let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition);
    match sqlx::query(&sql).execute(pool).await {
        Ok(_) => {
            info!("  Added {} column to {} table", column, table);
            Ok(())
        }
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
            info!("  {}.{} added concurrently - skipping", table, column);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Migration v1: sync checkpoint column on channels
///
/// Early stores tracked only a `tracks_outdated` flag; the checkpoint replaces it.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: Add tracks_synced_at to channels");

    if !table_exists(pool, "channels").await? {
        info!("  Channels table doesn't exist yet - skipping migration");
        return Ok(());
    }

    add_column_if_missing(pool, "channels", "tracks_synced_at", "TEXT").await
}

/// Migration v2: in-flight marker on channels
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: Add busy to channels");

    if !table_exists(pool, "channels").await? {
        info!("  Channels table doesn't exist yet - skipping migration");
        return Ok(());
    }

    add_column_if_missing(pool, "channels", "busy", "INTEGER NOT NULL DEFAULT 0").await
}

/// Migration v3: legacy lineage columns and lookup indexes
///
/// ALTER TABLE cannot add a UNIQUE column, so uniqueness of
/// `legacy_origin_id` is carried by explicit indexes for every store.
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v3: Legacy lineage columns and indexes");

    if table_exists(pool, "channels").await? {
        add_column_if_missing(pool, "channels", "legacy_origin_id", "TEXT").await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_channels_legacy_origin ON channels(legacy_origin_id)",
        )
        .execute(pool)
        .await?;
    }

    if table_exists(pool, "tracks").await? {
        add_column_if_missing(pool, "tracks", "legacy_origin_id", "TEXT").await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_tracks_legacy_origin ON tracks(legacy_origin_id)",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tracks_channel_updated ON tracks(channel_id, updated_at)",
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}
