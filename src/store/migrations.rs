// Wavesink - Music Downloader for Deezer
// Copyright (C) 2025 Wavesink contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Schema migrations
//!
//! Runtime SQL migrations tracked by a monotone version column in
//! `schema_migrations`. Each migration runs inside its own transaction,
//! so a partially applied migration cannot exist; re-opening an already
//! current database is a no-op.

use crate::error::{Result, WavesinkError};
use chrono::Utc;
use sqlx::{Executor, SqlitePool};

/// Applied in order; index + 1 is the schema version
const MIGRATIONS: &[(&str, &str)] = &[
    ("initial_schema", MIGRATION_1_INITIAL),
    ("resume_columns", MIGRATION_2_RESUME),
    ("pagination_indexes", MIGRATION_3_INDEXES),
    ("failed_tracks", MIGRATION_4_FAILED_TRACKS),
];

/// Bring the schema up to date
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .await?;

    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    let current = current.unwrap_or(0);

    for (index, (name, sql)) in MIGRATIONS.iter().enumerate() {
        let version = index as i64 + 1;
        if version <= current {
            continue;
        }

        let mut tx = pool.begin().await?;
        (&mut *tx).execute(*sql).await.map_err(|e| {
            WavesinkError::Migration(format!("migration {version} ({name}): {e}"))
        })?;
        sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(version)
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(version, name, "applied schema migration");
    }

    Ok(())
}

/// Current schema version, 0 for a fresh database
pub async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

const MIGRATION_1_INITIAL: &str = r#"
-- Queue: parents (albums, playlists) and child tracks in one table
CREATE TABLE IF NOT EXISTS queue_items (
    id TEXT PRIMARY KEY,
    item_type TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    artist TEXT NOT NULL DEFAULT '',
    album TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending',
    progress REAL NOT NULL DEFAULT 0,
    download_url TEXT,
    output_path TEXT,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    metadata_json TEXT,
    parent_id TEXT,
    total_tracks INTEGER NOT NULL DEFAULT 0,
    completed_tracks INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_queue_status ON queue_items(status);
CREATE INDEX IF NOT EXISTS idx_queue_created_at ON queue_items(created_at);
CREATE INDEX IF NOT EXISTS idx_queue_parent ON queue_items(parent_id);

-- Audit log of files actually written
CREATE TABLE IF NOT EXISTS download_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    track_id TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    artist TEXT NOT NULL DEFAULT '',
    album TEXT NOT NULL DEFAULT '',
    quality TEXT NOT NULL DEFAULT '',
    output_path TEXT NOT NULL,
    file_size INTEGER NOT NULL DEFAULT 0,
    downloaded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_track ON download_history(track_id);
CREATE INDEX IF NOT EXISTS idx_history_downloaded_at ON download_history(downloaded_at);

-- Small key/value stash for runtime state (not user configuration)
CREATE TABLE IF NOT EXISTS config_cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const MIGRATION_2_RESUME: &str = r#"
ALTER TABLE queue_items ADD COLUMN partial_file_path TEXT;
ALTER TABLE queue_items ADD COLUMN bytes_downloaded INTEGER NOT NULL DEFAULT 0;
ALTER TABLE queue_items ADD COLUMN total_bytes INTEGER NOT NULL DEFAULT 0;

CREATE INDEX IF NOT EXISTS idx_queue_resume
    ON queue_items(bytes_downloaded)
    WHERE partial_file_path IS NOT NULL;
"#;

const MIGRATION_3_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_queue_status_created
    ON queue_items(status, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_queue_updated
    ON queue_items(updated_at DESC);
"#;

const MIGRATION_4_FAILED_TRACKS: &str = r#"
CREATE TABLE IF NOT EXISTS failed_tracks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id TEXT NOT NULL REFERENCES queue_items(id) ON DELETE CASCADE,
    track_id TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    artist TEXT NOT NULL DEFAULT '',
    error_message TEXT NOT NULL DEFAULT '',
    failed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_failed_parent ON failed_tracks(parent_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::database::Database;

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let db = Database::new_in_memory().await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();

        assert_eq!(
            tables,
            vec![
                "config_cache",
                "download_history",
                "failed_tracks",
                "queue_items",
                "schema_migrations",
            ]
        );
    }

    #[tokio::test]
    async fn version_is_current_and_stable() {
        let db = Database::new_in_memory().await.unwrap();
        assert_eq!(schema_version(db.pool()).await.unwrap(), 4);

        // Running again must be a no-op
        run_migrations(db.pool()).await.unwrap();
        assert_eq!(schema_version(db.pool()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn reopening_a_file_database_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let db = Database::new(&path).await.unwrap();
            sqlx::query(
                "INSERT INTO queue_items (id, item_type, created_at, updated_at) \
                 VALUES ('t1', 'track', '2025-01-01T00:00:00+00:00', '2025-01-01T00:00:00+00:00')",
            )
            .execute(db.pool())
            .await
            .unwrap();
            db.close().await;
        }

        let db = Database::new(&path).await.unwrap();
        assert_eq!(schema_version(db.pool()).await.unwrap(), 4);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_items")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn migrating_from_version_one_adds_new_columns() {
        // Build a v1-only database by hand, then let the runner catch up
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, name TEXT NOT NULL, applied_at TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.execute(MIGRATION_1_INITIAL).await.unwrap();
        sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (1, 'initial_schema', 'x')")
            .execute(&pool)
            .await
            .unwrap();

        run_migrations(&pool).await.unwrap();
        assert_eq!(schema_version(&pool).await.unwrap(), 4);

        // Resume columns exist now
        sqlx::query("SELECT partial_file_path, bytes_downloaded, total_bytes FROM queue_items")
            .fetch_all(&pool)
            .await
            .unwrap();
        // failed_tracks exists now
        sqlx::query("SELECT parent_id FROM failed_tracks")
            .fetch_all(&pool)
            .await
            .unwrap();
    }
}
