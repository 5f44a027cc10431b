use chrono::{DateTime, SecondsFormat, Utc};
use r2d2_sqlite::SqliteConnectionManager;

use crate::{config::DatabaseConfig, error::StoreError, DbPool};

pub fn open_pool(config: &DatabaseConfig) -> Result<DbPool, StoreError> {
    let manager = SqliteConnectionManager::file(&config.url);
    let pool = r2d2::Pool::builder()
        .max_size(config.max_connections.max(1))
        .build(manager)?;
    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), StoreError> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS posts (
            id           TEXT PRIMARY KEY,
            community_id TEXT NOT NULL,
            title        TEXT NOT NULL,
            type         TEXT NOT NULL,
            created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            deleted_at   TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_posts_community_created
            ON posts(community_id, created_at DESC, id DESC)
            WHERE deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS post_metrics (
            post_id        TEXT PRIMARY KEY REFERENCES posts(id),
            upvote_count   INTEGER NOT NULL DEFAULT 0,
            downvote_count INTEGER NOT NULL DEFAULT 0,
            vote_score     INTEGER NOT NULL DEFAULT 0
        );
        ",
    )?;

    Ok(())
}

/// Canonical text form of stored timestamps; fixed width so text order is time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
