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


//! Queue, history, and config-cache operations
//!
//! Everything that touches `queue_items` goes through here so the
//! parent/child invariants hold no matter who calls:
//!
//! 1. A parent reaches `completed` only when its terminal children count
//!    equals `total_tracks`; violating updates are silently rewritten
//!    back to `downloading`.
//! 2. Partial-success parents (`completed` with missing children) survive
//!    clear-completed.
//! 3. Listing and stats cover parent rows only; child tracks are an
//!    implementation detail of the scheduler.
//!
//! No method retries internally; errors surface typed to the caller.

use crate::error::Result;
use crate::store::database::Database;
use crate::store::models::*;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;
use std::path::Path;

/// Hard cap on page size for queue and history listings
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Parents stuck in `downloading` longer than this with all children
/// terminal get promoted on startup
const STUCK_PARENT_AGE_MINUTES: i64 = 5;

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Durable queue store over the embedded database
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            db: Database::new(path).await?,
        })
    }

    pub async fn in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::new_in_memory().await?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    // ========================================================================
    // Row CRUD
    // ========================================================================

    /// Insert one row; returns false when the id already existed
    pub async fn insert_item(&self, item: &QueueItem) -> Result<bool> {
        let result = bind_item(sqlx::query(INSERT_SQL), item).execute(self.pool()).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert many rows in one transaction with `INSERT OR IGNORE`
    /// semantics; returns how many were actually inserted
    pub async fn insert_items_batch(&self, items: &[QueueItem]) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        let mut inserted = 0u64;
        for item in items {
            let result = bind_item(sqlx::query(INSERT_SQL), item).execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn get_item(&self, id: &str) -> Result<Option<QueueItem>> {
        let row = sqlx::query("SELECT * FROM queue_items WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(QueueItem::from_row).transpose()
    }

    /// Full-row update. Enforces the parent-completion invariant: a parent
    /// written as `completed` while its terminal children are short of
    /// `total_tracks` is silently rewritten back to `downloading` with
    /// `completed_at` cleared.
    pub async fn update_item(&self, item: &QueueItem) -> Result<()> {
        let mut effective_status = item.status;
        let mut effective_completed_at = item.completed_at.clone();

        if item.is_parent() && item.status == ItemStatus::Completed {
            let terminal = self.count_finished_children(&item.id).await?;
            if terminal < item.total_tracks as i64 {
                tracing::debug!(
                    parent = %item.id,
                    terminal,
                    total = item.total_tracks,
                    "refusing early parent completion"
                );
                effective_status = ItemStatus::Downloading;
                effective_completed_at = None;
            }
        }

        sqlx::query(
            r#"
            UPDATE queue_items SET
                item_type = ?, title = ?, artist = ?, album = ?, status = ?,
                progress = ?, download_url = ?, output_path = ?, error_message = ?,
                retry_count = ?, metadata_json = ?, partial_file_path = ?,
                bytes_downloaded = ?, total_bytes = ?, parent_id = ?,
                total_tracks = ?, completed_tracks = ?, updated_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(item.item_type.as_str())
        .bind(&item.title)
        .bind(&item.artist)
        .bind(&item.album)
        .bind(effective_status.as_str())
        .bind(item.progress)
        .bind(&item.download_url)
        .bind(&item.output_path)
        .bind(&item.error_message)
        .bind(item.retry_count as i64)
        .bind(&item.metadata_json)
        .bind(&item.partial_file_path)
        .bind(item.bytes_downloaded as i64)
        .bind(item.total_bytes as i64)
        .bind(&item.parent_id)
        .bind(item.total_tracks as i64)
        .bind(item.completed_tracks as i64)
        .bind(now())
        .bind(&effective_completed_at)
        .bind(&item.id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Delete a row and, for parents, every child row and failure record
    pub async fn delete_item(&self, id: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM queue_items WHERE parent_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM queue_items WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Status transitions
    // ========================================================================

    pub async fn set_status(&self, id: &str, status: ItemStatus) -> Result<()> {
        sqlx::query("UPDATE queue_items SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Worker claimed the row. Pulls a pending parent along so the UI sees
    /// the album as active while its first child streams.
    pub async fn mark_downloading(&self, id: &str) -> Result<()> {
        let ts = now();
        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE queue_items SET status = 'downloading', updated_at = ? WHERE id = ?")
            .bind(&ts)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE queue_items SET status = 'downloading', updated_at = ? \
             WHERE status = 'pending' \
             AND id = (SELECT parent_id FROM queue_items WHERE id = ?)",
        )
        .bind(&ts)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Byte-level progress from the downloader; keeps resume state fresh
    pub async fn update_progress(
        &self,
        id: &str,
        progress: f64,
        bytes_downloaded: u64,
        total_bytes: u64,
        partial_file_path: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE queue_items SET progress = ?, bytes_downloaded = ?, total_bytes = ?, \
             partial_file_path = ?, updated_at = ? WHERE id = ?",
        )
        .bind(progress.clamp(0.0, 100.0))
        .bind(bytes_downloaded as i64)
        .bind(total_bytes as i64)
        .bind(partial_file_path)
        .bind(now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Pause an in-flight row, recording how far the `.part` got
    pub async fn mark_paused(&self, id: &str, bytes_on_disk: Option<u64>) -> Result<()> {
        match bytes_on_disk {
            Some(bytes) => {
                sqlx::query(
                    "UPDATE queue_items SET status = 'paused', bytes_downloaded = ?, \
                     updated_at = ? WHERE id = ?",
                )
                .bind(bytes as i64)
                .bind(now())
                .bind(id)
                .execute(self.pool())
                .await?;
            }
            None => self.set_status(id, ItemStatus::Paused).await?,
        }
        Ok(())
    }

    /// Bump the attempt counter, returning the new value
    pub async fn increment_retry(&self, id: &str) -> Result<u32> {
        sqlx::query("UPDATE queue_items SET retry_count = retry_count + 1, updated_at = ? WHERE id = ?")
            .bind(now())
            .bind(id)
            .execute(self.pool())
            .await?;
        let count: i64 = sqlx::query_scalar("SELECT retry_count FROM queue_items WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool())
            .await?;
        Ok(count as u32)
    }

    /// User-initiated retry of a single row: clear the error, keep the
    /// partial file so the next attempt resumes
    pub async fn reset_for_retry(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE queue_items SET status = 'pending', progress = 0, error_message = NULL, \
             retry_count = 0, completed_at = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Startup recovery: rows left `downloading` by a dead process go back
    /// to `pending` before workers start
    pub async fn requeue_interrupted(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE queue_items SET status = 'pending', updated_at = ? WHERE status = 'downloading'",
        )
        .bind(now())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Child -> parent accounting
    // ========================================================================

    /// Terminal success for a track row. Runs the parent accounting in the
    /// same transaction and checkpoints the WAL when a parent lands.
    pub async fn complete_track(
        &self,
        id: &str,
        output_path: &str,
        total_bytes: u64,
    ) -> Result<Option<ParentTransition>> {
        let ts = now();
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "UPDATE queue_items SET status = 'completed', progress = 100, output_path = ?, \
             error_message = NULL, partial_file_path = NULL, total_bytes = ?, \
             bytes_downloaded = ?, completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(output_path)
        .bind(total_bytes as i64)
        .bind(total_bytes as i64)
        .bind(&ts)
        .bind(&ts)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let parent_id: Option<String> =
            sqlx::query_scalar("SELECT parent_id FROM queue_items WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .flatten();

        let transition = match parent_id {
            Some(parent_id) => {
                sqlx::query(
                    "UPDATE queue_items SET completed_tracks = completed_tracks + 1, \
                     updated_at = ? WHERE id = ?",
                )
                .bind(&ts)
                .bind(&parent_id)
                .execute(&mut *tx)
                .await?;
                settle_parent(&mut tx, &parent_id, &ts).await?
            }
            None => None,
        };

        tx.commit().await?;
        if transition.is_some() {
            self.db.checkpoint().await?;
        }
        Ok(transition)
    }

    /// Terminal failure for a track row; failed children of a parent are
    /// recorded in `failed_tracks` for the UI
    pub async fn fail_track(
        &self,
        id: &str,
        error_message: &str,
    ) -> Result<Option<ParentTransition>> {
        let ts = now();
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "UPDATE queue_items SET status = 'failed', error_message = ?, \
             completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(error_message)
        .bind(&ts)
        .bind(&ts)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            "SELECT parent_id, title, artist FROM queue_items WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut transition = None;
        if let Some(row) = row {
            use sqlx::Row;
            let parent_id: Option<String> = row.try_get("parent_id")?;
            if let Some(parent_id) = parent_id {
                let title: String = row.try_get("title")?;
                let artist: String = row.try_get("artist")?;
                sqlx::query(
                    "INSERT INTO failed_tracks (parent_id, track_id, title, artist, error_message, failed_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&parent_id)
                .bind(id)
                .bind(&title)
                .bind(&artist)
                .bind(error_message)
                .bind(&ts)
                .execute(&mut *tx)
                .await?;

                transition = settle_parent(&mut tx, &parent_id, &ts).await?;
            }
        }

        tx.commit().await?;
        if transition.is_some() {
            self.db.checkpoint().await?;
        }
        Ok(transition)
    }

    /// Children of `parent_id` in a terminal state, regardless of how many
    /// retries they took
    pub async fn count_finished_children(&self, parent_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_items WHERE parent_id = ? \
             AND status IN ('completed', 'failed')",
        )
        .bind(parent_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    pub async fn failed_tracks(&self, parent_id: &str) -> Result<Vec<FailedTrack>> {
        let rows = sqlx::query("SELECT * FROM failed_tracks WHERE parent_id = ? ORDER BY id")
            .bind(parent_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(FailedTrack::from_row).collect()
    }

    /// Retry of a partial-success parent: only its failed children go back
    /// to pending. Returns their ids in FIFO order for re-admission.
    pub async fn reset_failed_children(&self, parent_id: &str) -> Result<Vec<String>> {
        let ts = now();
        let mut tx = self.pool().begin().await?;

        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM queue_items WHERE parent_id = ? AND status = 'failed' \
             ORDER BY created_at, rowid",
        )
        .bind(parent_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE queue_items SET status = 'pending', error_message = NULL, retry_count = 0, \
             progress = 0, completed_at = NULL, updated_at = ? \
             WHERE parent_id = ? AND status = 'failed'",
        )
        .bind(&ts)
        .bind(parent_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM failed_tracks WHERE parent_id = ?")
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE queue_items SET status = 'downloading', completed_at = NULL, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&ts)
        .bind(parent_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ids)
    }

    // ========================================================================
    // Listing, stats, scheduling order
    // ========================================================================

    /// One page of the queue, parents only, newest first. While a parent
    /// is non-terminal its `completed_tracks` and `progress` are derived
    /// from the children; once terminal the stored values are trusted so
    /// the completion transition cannot oscillate.
    pub async fn list_queue(
        &self,
        offset: u32,
        limit: u32,
        status_filter: Option<ItemStatus>,
    ) -> Result<QueuePage> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);

        let (where_clause, total_sql) = match status_filter {
            Some(_) => (
                "WHERE q.item_type IN ('album', 'playlist') AND q.status = ?",
                "SELECT COUNT(*) FROM queue_items q \
                 WHERE q.item_type IN ('album', 'playlist') AND q.status = ?",
            ),
            None => (
                "WHERE q.item_type IN ('album', 'playlist')",
                "SELECT COUNT(*) FROM queue_items q WHERE q.item_type IN ('album', 'playlist')",
            ),
        };

        let list_sql = format!(
            r#"
            SELECT q.*,
                CASE WHEN q.status IN ('completed', 'failed') THEN q.completed_tracks
                     ELSE (SELECT COUNT(*) FROM queue_items c
                           WHERE c.parent_id = q.id AND c.status = 'completed')
                END AS live_completed,
                COALESCE((SELECT AVG(c.progress) FROM queue_items c WHERE c.parent_id = q.id),
                         q.progress) AS live_progress
            FROM queue_items q
            {where_clause}
            ORDER BY q.created_at DESC, q.rowid DESC
            LIMIT ? OFFSET ?
            "#
        );

        let mut list_query = sqlx::query(&list_sql);
        let mut total_query = sqlx::query_scalar::<_, i64>(total_sql);
        if let Some(status) = status_filter {
            list_query = list_query.bind(status.as_str());
            total_query = total_query.bind(status.as_str());
        }

        let rows = list_query
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(self.pool())
            .await?;
        let total = total_query.fetch_one(self.pool()).await?;

        let items = rows
            .iter()
            .map(hydrate_listed_item)
            .collect::<Result<Vec<_>>>()?;

        Ok(QueuePage {
            items,
            total: total as u64,
            offset,
            limit,
        })
    }

    /// Status-bucket counts over parent rows only
    pub async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN status = 'downloading' THEN 1 ELSE 0 END) AS downloading,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
                SUM(CASE WHEN status = 'paused' THEN 1 ELSE 0 END) AS paused,
                COUNT(*) AS total
            FROM queue_items
            WHERE item_type IN ('album', 'playlist')
            "#,
        )
        .fetch_one(self.pool())
        .await?;

        use sqlx::Row;
        let get = |name: &str| -> Result<u64> {
            Ok(row.try_get::<Option<i64>, _>(name)?.unwrap_or(0) as u64)
        };
        Ok(QueueStats {
            pending: get("pending")?,
            downloading: get("downloading")?,
            completed: get("completed")?,
            failed: get("failed")?,
            paused: get("paused")?,
            total: get("total")?,
        })
    }

    /// Track rows awaiting a worker, in admission (FIFO) order
    pub async fn pending_track_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM queue_items WHERE item_type = 'track' AND status = 'pending' \
             ORDER BY created_at, rowid",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }

    /// Every child row of a parent, oldest first
    pub async fn children_of(&self, parent_id: &str) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            "SELECT * FROM queue_items WHERE parent_id = ? ORDER BY created_at, rowid",
        )
        .bind(parent_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(QueueItem::from_row).collect()
    }

    pub async fn count_children(&self, parent_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_items WHERE parent_id = ?")
            .bind(parent_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Pending children of one parent in admission order
    pub async fn children_pending(&self, parent_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM queue_items WHERE parent_id = ? AND status = 'pending' \
             ORDER BY created_at, rowid",
        )
        .bind(parent_id)
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }

    /// Record the expansion result on a parent row
    pub async fn finish_parent_expansion(
        &self,
        parent_id: &str,
        title: &str,
        artist: &str,
        total_tracks: u32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE queue_items SET title = ?, artist = ?, album = ?, total_tracks = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(title)
        .bind(artist)
        .bind(title)
        .bind(total_tracks as i64)
        .bind(now())
        .bind(parent_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// After cancelling part of a family: shrink `total_tracks` to the
    /// surviving children and settle the parent. Deletes the parent when
    /// nothing survived. Returns the parent's final status, if it still
    /// exists.
    pub async fn refit_parent_after_cancel(&self, parent_id: &str) -> Result<Option<ItemStatus>> {
        let ts = now();
        let mut tx = self.pool().begin().await?;

        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_items WHERE parent_id = ?")
                .bind(parent_id)
                .fetch_one(&mut *tx)
                .await?;

        if remaining == 0 {
            sqlx::query("DELETE FROM queue_items WHERE id = ?")
                .bind(parent_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(None);
        }

        sqlx::query(
            "UPDATE queue_items SET total_tracks = ?, updated_at = ? WHERE id = ?",
        )
        .bind(remaining)
        .bind(&ts)
        .bind(parent_id)
        .execute(&mut *tx)
        .await?;

        let transition = settle_parent(&mut tx, parent_id, &ts).await?;
        tx.commit().await?;

        if let Some(transition) = transition {
            self.db.checkpoint().await?;
            Ok(Some(transition.status))
        } else {
            Ok(Some(ItemStatus::Downloading))
        }
    }

    // ========================================================================
    // Cleanup routines
    // ========================================================================

    /// Demote parents recorded `completed` whose children never all
    /// finished (crash between child updates and the parent transition)
    pub async fn fix_incomplete_albums(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items SET status = 'pending', completed_at = NULL, updated_at = ?
            WHERE item_type IN ('album', 'playlist') AND status = 'completed'
            AND (SELECT COUNT(*) FROM queue_items c
                 WHERE c.parent_id = queue_items.id
                 AND c.status IN ('completed', 'failed')) < total_tracks
            "#,
        )
        .bind(now())
        .execute(self.pool())
        .await?;

        let fixed = result.rows_affected();
        if fixed > 0 {
            tracing::info!(fixed, "demoted prematurely completed parents");
        }
        Ok(fixed)
    }

    /// Promote parents stuck `downloading` with no recent updates whose
    /// existing children are all terminal
    pub async fn fix_stuck_albums(&self) -> Result<u64> {
        let ts = now();
        let cutoff = (Utc::now() - ChronoDuration::minutes(STUCK_PARENT_AGE_MINUTES)).to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE queue_items SET
                status = 'completed',
                completed_tracks = (SELECT COUNT(*) FROM queue_items c
                                    WHERE c.parent_id = queue_items.id AND c.status = 'completed'),
                completed_at = ?,
                updated_at = ?
            WHERE item_type IN ('album', 'playlist') AND status = 'downloading'
            AND updated_at < ?
            AND EXISTS (SELECT 1 FROM queue_items c WHERE c.parent_id = queue_items.id)
            AND NOT EXISTS (SELECT 1 FROM queue_items c
                            WHERE c.parent_id = queue_items.id
                            AND c.status NOT IN ('completed', 'failed'))
            "#,
        )
        .bind(&ts)
        .bind(&ts)
        .bind(&cutoff)
        .execute(self.pool())
        .await?;

        let fixed = result.rows_affected();
        if fixed > 0 {
            tracing::info!(fixed, "promoted stuck parents with settled children");
            self.db.checkpoint().await?;
        }
        Ok(fixed)
    }

    /// Remove fully successful families. Partial-success parents and any
    /// parent with a surviving non-terminal child are preserved. One
    /// transaction. Also sweeps completed standalone tracks.
    pub async fn clear_completed(&self) -> Result<u64> {
        let mut tx = self.pool().begin().await?;

        let children = sqlx::query(
            r#"
            DELETE FROM queue_items
            WHERE item_type = 'track' AND status = 'completed'
            AND parent_id IN (
                SELECT p.id FROM queue_items p
                WHERE p.item_type IN ('album', 'playlist') AND p.status = 'completed'
                AND p.completed_tracks >= p.total_tracks
                AND NOT EXISTS (SELECT 1 FROM queue_items c
                                WHERE c.parent_id = p.id
                                AND c.status NOT IN ('completed', 'failed'))
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let parents = sqlx::query(
            r#"
            DELETE FROM queue_items
            WHERE item_type IN ('album', 'playlist') AND status = 'completed'
            AND completed_tracks >= total_tracks
            AND NOT EXISTS (SELECT 1 FROM queue_items c WHERE c.parent_id = queue_items.id)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let loose = sqlx::query(
            "DELETE FROM queue_items WHERE item_type = 'track' \
             AND parent_id IS NULL AND status = 'completed'",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(children.rows_affected() + parents.rows_affected() + loose.rows_affected())
    }

    // ========================================================================
    // History
    // ========================================================================

    pub async fn history_append(&self, entry: &HistoryEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO download_history (track_id, title, artist, album, quality, output_path, \
             file_size, downloaded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.track_id)
        .bind(&entry.title)
        .bind(&entry.artist)
        .bind(&entry.album)
        .bind(&entry.quality)
        .bind(&entry.output_path)
        .bind(entry.file_size as i64)
        .bind(&entry.downloaded_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn history_page(&self, offset: u32, limit: u32) -> Result<Vec<HistoryEntry>> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let rows = sqlx::query(
            "SELECT * FROM download_history ORDER BY downloaded_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(HistoryEntry::from_row).collect()
    }

    /// Dedup hint: has this track ever been written successfully?
    pub async fn history_for_track(&self, track_id: &str) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query(
            "SELECT * FROM download_history WHERE track_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(track_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(HistoryEntry::from_row).transpose()
    }

    // ========================================================================
    // Config cache
    // ========================================================================

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM config_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(value)
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO config_cache (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now())
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

const INSERT_SQL: &str = r#"
INSERT OR IGNORE INTO queue_items (
    id, item_type, title, artist, album, status, progress, download_url,
    output_path, error_message, retry_count, metadata_json, partial_file_path,
    bytes_downloaded, total_bytes, parent_id, total_tracks, completed_tracks,
    created_at, updated_at, completed_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

fn bind_item<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    item: &'q QueueItem,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&item.id)
        .bind(item.item_type.as_str())
        .bind(&item.title)
        .bind(&item.artist)
        .bind(&item.album)
        .bind(item.status.as_str())
        .bind(item.progress)
        .bind(&item.download_url)
        .bind(&item.output_path)
        .bind(&item.error_message)
        .bind(item.retry_count as i64)
        .bind(&item.metadata_json)
        .bind(&item.partial_file_path)
        .bind(item.bytes_downloaded as i64)
        .bind(item.total_bytes as i64)
        .bind(&item.parent_id)
        .bind(item.total_tracks as i64)
        .bind(item.completed_tracks as i64)
        .bind(&item.created_at)
        .bind(&item.updated_at)
        .bind(&item.completed_at)
}

/// Listing rows carry two derived columns next to the raw row
fn hydrate_listed_item(row: &SqliteRow) -> Result<QueueItem> {
    use sqlx::Row;
    let mut item = QueueItem::from_row(row)?;
    item.completed_tracks = row.try_get::<i64, _>("live_completed")? as u32;
    item.progress = row.try_get::<f64, _>("live_progress")?;
    Ok(item)
}

/// Promote a parent when every expected child is terminal: `completed`
/// when at least one child succeeded, `failed` when none did. Leaves the
/// parent `downloading` otherwise.
async fn settle_parent(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    parent_id: &str,
    ts: &str,
) -> Result<Option<ParentTransition>> {
    use sqlx::Row;

    let parent = sqlx::query(
        "SELECT total_tracks, status FROM queue_items WHERE id = ?",
    )
    .bind(parent_id)
    .fetch_optional(&mut **tx)
    .await?;
    let Some(parent) = parent else {
        return Ok(None);
    };
    let total_tracks: i64 = parent.try_get("total_tracks")?;

    let counts = sqlx::query(
        "SELECT \
            SUM(CASE WHEN status IN ('completed', 'failed') THEN 1 ELSE 0 END) AS terminal, \
            SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed, \
            SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed \
         FROM queue_items WHERE parent_id = ?",
    )
    .bind(parent_id)
    .fetch_one(&mut **tx)
    .await?;

    let terminal = counts.try_get::<Option<i64>, _>("terminal")?.unwrap_or(0);
    let completed = counts.try_get::<Option<i64>, _>("completed")?.unwrap_or(0);
    let failed = counts.try_get::<Option<i64>, _>("failed")?.unwrap_or(0);

    if terminal < total_tracks {
        return Ok(None);
    }

    let status = if completed > 0 {
        ItemStatus::Completed
    } else {
        ItemStatus::Failed
    };

    sqlx::query(
        "UPDATE queue_items SET status = ?, completed_tracks = ?, progress = 100, \
         completed_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(completed)
    .bind(ts)
    .bind(ts)
    .bind(parent_id)
    .execute(&mut **tx)
    .await?;

    Ok(Some(ParentTransition {
        parent_id: parent_id.to_string(),
        status,
        completed_tracks: completed as u32,
        failed_tracks: failed as u32,
        total_tracks: total_tracks as u32,
    }))
}
