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


//! Download scheduler
//!
//! One FIFO job channel, a fixed pool of workers, and the accounting that
//! turns child outcomes into parent state. Admission is cheap and
//! synchronous (row insert + channel send); album and playlist expansion
//! runs on its own task so the facade never waits on the network.
//!
//! Guarantees kept here:
//! - admission order is FIFO by `created_at`;
//! - at most `concurrent_downloads` jobs run at once;
//! - no two workers ever hold the same row id;
//! - a pause or shutdown preserves `.part` files and byte counts, so the
//!   next start resumes instead of restarting;
//! - a parent's terminal notification follows all of its children's.

use crate::api::models::{CustomPlaylist, Quality, TrackMetadata};
use crate::api::ServiceApi;
use crate::app::App;
use crate::config::Settings;
use crate::download::downloader::{Downloader, TrackJob, TrackOutcome};
use crate::download::notify::{Notifier, ProgressUpdate, SpeedTracker, StatusUpdate};
use crate::error::{Result, WavesinkError};
use crate::file::{plan_track_paths, TrackPaths, TrackPlacement};
use crate::recovery::RecoveryManager;
use crate::store::models::*;
use crate::store::Store;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often in-flight byte counts are flushed to the store and the UI
const PROGRESS_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// How long cancel/pause waits for a worker to release a row
const RELEASE_WAIT: Duration = Duration::from_secs(5);

struct SchedulerHandles {
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    observer: JoinHandle<()>,
}

/// The scheduler. Shared as `Arc`; all mutability is interior.
pub struct DownloadManager {
    app: Arc<App>,
    store: Arc<Store>,
    api: Arc<dyn ServiceApi>,
    downloader: Arc<Downloader>,
    recovery: Arc<RecoveryManager>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<RwLock<Settings>>,
    scheduler: AsyncMutex<Option<SchedulerHandles>>,
    /// Rows currently held by a worker, with their per-job tokens
    active: Arc<AsyncMutex<HashMap<String, CancellationToken>>>,
    job_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Serializes expansion batch inserts so parallel album admissions do
    /// not contend on the WAL writer lock
    batch_lock: AsyncMutex<()>,
    /// Distinguishes StopAll from an unexpected context cancellation
    stop_requested: Arc<AtomicBool>,
}

impl DownloadManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        app: Arc<App>,
        store: Arc<Store>,
        api: Arc<dyn ServiceApi>,
        downloader: Arc<Downloader>,
        recovery: Arc<RecoveryManager>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<RwLock<Settings>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            app,
            store,
            api,
            downloader,
            recovery,
            notifier,
            settings,
            scheduler: AsyncMutex::new(None),
            active: Arc::new(AsyncMutex::new(HashMap::new())),
            job_tx: Mutex::new(None),
            batch_lock: AsyncMutex::new(()),
            stop_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    fn settings_snapshot(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Run startup recovery and spawn the worker pool. Idempotent: a
    /// running scheduler is left alone.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() {
            return Ok(());
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let demoted = self.store.requeue_interrupted().await?;
        let incomplete = self.store.fix_incomplete_albums().await?;
        let stuck = self.store.fix_stuck_albums().await?;
        tracing::info!(demoted, incomplete, stuck, "startup queue recovery done");

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        for id in self.store.pending_track_ids().await? {
            let _ = tx.send(id);
        }
        *self.job_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

        let token = self.app.token().child_token();
        let workers = self.settings_snapshot().download.concurrent_downloads.clamp(1, 32);
        let rx = Arc::new(AsyncMutex::new(rx));

        let mut handles = Vec::with_capacity(workers as usize);
        for worker_id in 0..workers {
            let manager = Arc::clone(self);
            let rx = Arc::clone(&rx);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                manager.worker_loop(worker_id, rx, token).await;
            }));
        }

        let observer = {
            let app = Arc::clone(&self.app);
            let stop_requested = Arc::clone(&self.stop_requested);
            let token = token.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                if !app.is_intentional_shutdown() && !stop_requested.load(Ordering::SeqCst) {
                    tracing::error!(
                        operation = "scheduler_observer",
                        "scheduler context cancelled outside an intentional shutdown"
                    );
                }
            })
        };

        tracing::info!(workers, "scheduler started");
        *scheduler = Some(SchedulerHandles {
            token,
            workers: handles,
            observer,
        });
        Ok(())
    }

    /// Signal the scheduler and wait for workers to drain. In-flight rows
    /// revert to `paused` so the next start resumes them.
    pub async fn stop_all(&self) {
        let handles = {
            let mut scheduler = self.scheduler.lock().await;
            scheduler.take()
        };
        let Some(handles) = handles else { return };

        self.stop_requested.store(true, Ordering::SeqCst);
        *self.job_tx.lock().unwrap_or_else(|e| e.into_inner()) = None;
        handles.token.cancel();

        for worker in handles.workers {
            let _ = worker.await;
        }
        handles.observer.abort();
        tracing::info!("scheduler stopped, in-flight rows parked as paused");
        self.notifier.queue_changed();
    }

    fn enqueue(&self, id: &str) {
        let tx = self.job_tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(id.to_string());
        }
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Queue a single track. Metadata resolution happens on the worker,
    /// so this returns as soon as the row exists.
    pub async fn download_track(&self, track_id: &str) -> Result<()> {
        match self.store.get_item(track_id).await? {
            Some(row) if !row.status.is_terminal() => {
                return Err(WavesinkError::AlreadyQueued(track_id.to_string()));
            }
            Some(_) => self.store.reset_for_retry(track_id).await?,
            None => {
                self.store
                    .insert_item(&QueueItem::placeholder_track(track_id))
                    .await?;
            }
        }
        self.enqueue(track_id);
        self.notifier.queue_changed();
        Ok(())
    }

    /// Queue an album. The child listing is fetched on a background task;
    /// the parent row is visible immediately.
    pub async fn download_album(self: &Arc<Self>, album_id: &str) -> Result<()> {
        let row_id = self.claim_parent(album_row_id(album_id), ItemType::Album).await?;
        let manager = Arc::clone(self);
        let album_id = album_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = manager.expand_album(&album_id, &row_id).await {
                manager.fail_parent(&row_id, &err).await;
            }
        });
        Ok(())
    }

    /// Queue a playlist, same shape as [`download_album`](Self::download_album)
    pub async fn download_playlist(self: &Arc<Self>, playlist_id: &str) -> Result<()> {
        let row_id = self
            .claim_parent(playlist_row_id(playlist_id), ItemType::Playlist)
            .await?;
        let manager = Arc::clone(self);
        let playlist_id = playlist_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = manager.expand_playlist(&playlist_id, &row_id).await {
                manager.fail_parent(&row_id, &err).await;
            }
        });
        Ok(())
    }

    /// Queue an externally supplied track list. No service round-trip is
    /// needed, so the expansion happens inline.
    pub async fn download_custom_playlist(&self, payload: &str) -> Result<()> {
        let playlist: CustomPlaylist = serde_json::from_str(payload)
            .map_err(|e| WavesinkError::validation(format!("custom playlist: {e}")))?;
        if playlist.tracks.is_empty() {
            return Err(WavesinkError::validation("custom playlist has no tracks"));
        }

        let digest = Sha256::digest(playlist.name.as_bytes());
        let row_id = playlist_row_id(&format!("custom_{}", &hex::encode(digest)[..12]));
        self.claim_parent_with_id(&row_id, ItemType::Playlist).await?;

        let metas: Vec<TrackMetadata> = playlist
            .tracks
            .iter()
            .enumerate()
            .map(|(index, track)| {
                TrackMetadata::in_playlist(track.clone(), &playlist.name, index as u32 + 1)
            })
            .collect();

        self.insert_children(&row_id, &playlist.name, "", &metas).await?;
        Ok(())
    }

    async fn claim_parent(&self, row_id: String, item_type: ItemType) -> Result<String> {
        self.claim_parent_with_id(&row_id, item_type).await?;
        Ok(row_id)
    }

    async fn claim_parent_with_id(&self, row_id: &str, item_type: ItemType) -> Result<()> {
        match self.store.get_item(row_id).await? {
            Some(row) if !row.status.is_terminal() => {
                return Err(WavesinkError::AlreadyQueued(row_id.to_string()));
            }
            Some(_) => self.store.delete_item(row_id).await?,
            None => {}
        }
        self.store
            .insert_item(&QueueItem::new_parent(
                row_id.to_string(),
                item_type,
                "",
                "",
                0,
            ))
            .await?;
        self.notifier.queue_changed();
        Ok(())
    }

    async fn expand_album(&self, album_id: &str, row_id: &str) -> Result<()> {
        let token = self.expansion_token().await;
        let api = Arc::clone(&self.api);
        let id = album_id.to_string();
        let album = self
            .recovery
            .execute(&token, "album_lookup", move |_| {
                let api = Arc::clone(&api);
                let id = id.clone();
                async move { api.album(&id).await }
            })
            .await?;

        let metas: Vec<TrackMetadata> = album
            .tracks
            .iter()
            .map(|track| {
                let mut track = track.clone();
                if track.album_artist.is_none() {
                    track.album_artist = Some(album.artist.clone());
                }
                TrackMetadata::from_track(track)
            })
            .collect();

        self.insert_children(row_id, &album.title, &album.artist, &metas).await
    }

    async fn expand_playlist(&self, playlist_id: &str, row_id: &str) -> Result<()> {
        let token = self.expansion_token().await;
        let api = Arc::clone(&self.api);
        let id = playlist_id.to_string();
        let playlist = self
            .recovery
            .execute(&token, "playlist_lookup", move |_| {
                let api = Arc::clone(&api);
                let id = id.clone();
                async move { api.playlist(&id).await }
            })
            .await?;

        let metas: Vec<TrackMetadata> = playlist
            .tracks
            .iter()
            .enumerate()
            .map(|(index, track)| {
                TrackMetadata::in_playlist(track.clone(), &playlist.title, index as u32 + 1)
            })
            .collect();

        self.insert_children(row_id, &playlist.title, "", &metas).await
    }

    /// Batch-insert child rows, fix up the parent's totals, and enqueue
    /// every child this parent actually owns
    async fn insert_children(
        &self,
        row_id: &str,
        title: &str,
        artist: &str,
        metas: &[TrackMetadata],
    ) -> Result<()> {
        let children = metas
            .iter()
            .map(|meta| QueueItem::new_track(meta, Some(row_id)))
            .collect::<Result<Vec<_>>>()?;

        {
            let _guard = self.batch_lock.lock().await;
            self.store.insert_items_batch(&children).await?;
        }

        // A track already queued elsewhere keeps its original owner; only
        // rows that actually reference this parent count toward it.
        let owned = self.store.count_children(row_id).await?;
        if owned == 0 {
            return Err(WavesinkError::not_found(format!(
                "no queueable tracks for {row_id}"
            )));
        }
        self.store
            .finish_parent_expansion(row_id, title, artist, owned as u32)
            .await?;

        for child_id in self.store.children_pending(row_id).await? {
            self.enqueue(&child_id);
        }

        tracing::info!(parent = row_id, tracks = owned, "expanded parent into children");
        self.notifier.queue_changed();
        Ok(())
    }

    async fn fail_parent(&self, row_id: &str, err: &WavesinkError) {
        tracing::error!(
            operation = "expand_parent",
            parent = row_id,
            category = err.category().as_str(),
            error = %err,
            "parent expansion failed"
        );
        if let Ok(Some(mut row)) = self.store.get_item(row_id).await {
            row.status = ItemStatus::Failed;
            row.error_message = Some(err.to_string());
            if self.store.update_item(&row).await.is_ok() {
                self.notifier.status(&StatusUpdate {
                    id: row_id.to_string(),
                    status: ItemStatus::Failed,
                    error: Some(err.to_string()),
                });
                self.notifier.queue_changed();
            }
        }
    }

    async fn expansion_token(&self) -> CancellationToken {
        let scheduler = self.scheduler.lock().await;
        match scheduler.as_ref() {
            Some(handles) => handles.token.clone(),
            None => self.app.token().child_token(),
        }
    }

    // ========================================================================
    // User actions on queued rows
    // ========================================================================

    /// Park a row (and for parents, its live children). The worker exits
    /// at its next cancellation point; `.part` files stay.
    pub async fn pause(&self, id: &str) -> Result<()> {
        let row = self
            .store
            .get_item(id)
            .await?
            .ok_or_else(|| WavesinkError::not_found(id))?;

        if row.is_parent() {
            for child in self.store.children_of(id).await? {
                if !child.status.is_terminal() {
                    self.pause_row(&child.id).await?;
                }
            }
            self.store.set_status(id, ItemStatus::Paused).await?;
        } else {
            self.pause_row(id).await?;
        }

        self.notifier.status(&StatusUpdate {
            id: id.to_string(),
            status: ItemStatus::Paused,
            error: None,
        });
        self.notifier.queue_changed();
        Ok(())
    }

    async fn pause_row(&self, id: &str) -> Result<()> {
        // Status first: the worker's cancellation handler keeps `paused`
        self.store.mark_paused(id, None).await?;
        let token = self.active.lock().await.get(id).cloned();
        if let Some(token) = token {
            token.cancel();
        }
        Ok(())
    }

    /// Put a paused row (or a parent's paused children) back in line
    pub async fn resume(&self, id: &str) -> Result<()> {
        let row = self
            .store
            .get_item(id)
            .await?
            .ok_or_else(|| WavesinkError::not_found(id))?;

        if row.is_parent() {
            for child in self.store.children_of(id).await? {
                if child.status == ItemStatus::Paused {
                    self.store.set_status(&child.id, ItemStatus::Pending).await?;
                    self.enqueue(&child.id);
                }
            }
            self.store.set_status(id, ItemStatus::Downloading).await?;
        } else {
            if row.status != ItemStatus::Paused {
                return Err(WavesinkError::InvalidState(format!(
                    "{} is not paused",
                    id
                )));
            }
            self.store.set_status(id, ItemStatus::Pending).await?;
            self.enqueue(id);
        }

        self.notifier.queue_changed();
        Ok(())
    }

    /// Remove a row from the queue. Running work is cancelled first; a
    /// leaf loses its row and `.part`, a parent keeps already-completed
    /// children and shrinks around them.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let row = self
            .store
            .get_item(id)
            .await?
            .ok_or_else(|| WavesinkError::not_found(id))?;

        if row.is_parent() {
            for child in self.store.children_of(id).await? {
                if child.status.is_terminal() {
                    continue;
                }
                self.cancel_leaf(&child).await?;
            }
            self.store.refit_parent_after_cancel(id).await?;
        } else {
            self.cancel_leaf(&row).await?;
        }

        self.notifier.queue_changed();
        Ok(())
    }

    async fn cancel_leaf(&self, row: &QueueItem) -> Result<()> {
        // Pause first so the worker exits cleanly, then delete
        self.store.mark_paused(&row.id, None).await?;
        let token = self.active.lock().await.get(&row.id).cloned();
        if let Some(token) = token {
            token.cancel();
            self.wait_for_release(&row.id).await;
        }

        // Re-read: the worker may have recorded the part path after our
        // snapshot was taken
        let part = self
            .store
            .get_item(&row.id)
            .await?
            .and_then(|current| current.partial_file_path)
            .or_else(|| row.partial_file_path.clone());

        self.store.delete_item(&row.id).await?;
        if let Some(part) = part {
            if !part.is_empty() {
                let _ = tokio::fs::remove_file(part).await;
            }
        }
        Ok(())
    }

    /// Re-run failures. For a partial-success or failed parent only the
    /// failed children go back in line; a leaf is reset wholesale.
    pub async fn retry(&self, id: &str) -> Result<()> {
        let row = self
            .store
            .get_item(id)
            .await?
            .ok_or_else(|| WavesinkError::not_found(id))?;

        if row.is_parent() {
            let children = self.store.reset_failed_children(id).await?;
            if children.is_empty() {
                return Err(WavesinkError::InvalidState(format!(
                    "{id} has no failed tracks to retry"
                )));
            }
            for child_id in &children {
                self.enqueue(child_id);
            }
        } else {
            if !row.status.is_terminal() {
                return Err(WavesinkError::InvalidState(format!(
                    "{id} is not in a terminal state"
                )));
            }
            self.store.reset_for_retry(id).await?;
            self.enqueue(id);
        }

        self.notifier.queue_changed();
        Ok(())
    }

    async fn wait_for_release(&self, id: &str) {
        let deadline = tokio::time::Instant::now() + RELEASE_WAIT;
        loop {
            if !self.active.lock().await.contains_key(id) {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(id, "worker did not release row in time");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    // ========================================================================
    // Workers
    // ========================================================================

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: u32,
        rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>,
        token: CancellationToken,
    ) {
        tracing::debug!(worker_id, "worker up");
        loop {
            let id = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = token.cancelled() => None,
                    id = rx.recv() => id,
                }
            };
            let Some(id) = id else { break };

            if let Err(err) = self.process_job(&id, &token).await {
                tracing::error!(
                    operation = "process_job",
                    worker_id,
                    id = %id,
                    category = err.category().as_str(),
                    error = %err,
                    "job bookkeeping failed"
                );
            }
        }
        tracing::debug!(worker_id, "worker down");
    }

    async fn process_job(&self, id: &str, scheduler_token: &CancellationToken) -> Result<()> {
        // Claim: a row already held by another worker is a no-op
        let job_token = {
            let mut active = self.active.lock().await;
            if active.contains_key(id) {
                return Ok(());
            }
            let token = scheduler_token.child_token();
            active.insert(id.to_string(), token.clone());
            token
        };

        let result = self.run_job(id, &job_token).await;
        self.active.lock().await.remove(id);
        result
    }

    async fn run_job(&self, id: &str, token: &CancellationToken) -> Result<()> {
        let Some(row) = self.store.get_item(id).await? else {
            return Ok(());
        };
        // Paused or cancelled while waiting in the channel
        if row.status != ItemStatus::Pending {
            return Ok(());
        }

        self.store.mark_downloading(id).await?;
        self.notifier.status(&StatusUpdate {
            id: id.to_string(),
            status: ItemStatus::Downloading,
            error: None,
        });
        self.notifier.queue_changed();

        let settings = Arc::new(self.settings_snapshot());
        let prepared = self.prepare_job(&row, &settings, token).await;
        let (meta, paths, quality) = match prepared {
            Ok(parts) => parts,
            Err(err) => return self.finish_job(id, &row, Err(err), None).await,
        };

        // Progress flows: downloader -> watch channel -> flush task ->
        // store + notifier. The callback itself must stay synchronous.
        let (progress_tx, progress_rx) = watch::channel((row.bytes_downloaded, row.total_bytes));
        let flusher = self.spawn_progress_flusher(
            id.to_string(),
            row.title.clone(),
            paths.part_path.clone(),
            progress_rx,
        );

        let result = {
            let store = Arc::clone(&self.store);
            let downloader = Arc::clone(&self.downloader);
            let meta = Arc::clone(&meta);
            let paths = Arc::clone(&paths);
            let settings = Arc::clone(&settings);
            let id = id.to_string();
            let token = token.clone();
            let progress_tx = Arc::new(progress_tx);

            self.recovery
                .execute(&token.clone(), "download_track", move |attempt| {
                    let store = Arc::clone(&store);
                    let downloader = Arc::clone(&downloader);
                    let meta = Arc::clone(&meta);
                    let paths = Arc::clone(&paths);
                    let settings = Arc::clone(&settings);
                    let progress_tx = Arc::clone(&progress_tx);
                    let id = id.clone();
                    let token = token.clone();
                    async move {
                        if attempt > 0 {
                            store.increment_retry(&id).await?;
                        }
                        let fresh = store
                            .get_item(&id)
                            .await?
                            .ok_or(WavesinkError::Cancelled)?;
                        // On a retry within this session the `.part` on
                        // disk is ahead of whatever the flusher persisted;
                        // the first attempt sticks to the recorded offset
                        let resume_from = if attempt > 0 {
                            tokio::fs::metadata(&paths.part_path)
                                .await
                                .ok()
                                .map(|m| m.len())
                                .unwrap_or(fresh.bytes_downloaded)
                        } else {
                            fresh.bytes_downloaded
                        };
                        let mut progress = |bytes: u64, total: u64| {
                            let _ = progress_tx.send((bytes, total));
                        };
                        downloader
                            .download_track(
                                TrackJob {
                                    track_id: &id,
                                    meta: &meta,
                                    paths: &paths,
                                    quality,
                                    bytes_downloaded: resume_from,
                                    total_bytes: fresh.total_bytes,
                                    settings: &settings,
                                    token: &token,
                                },
                                &mut progress,
                            )
                            .await
                    }
                })
                .await
        };

        flusher.abort();
        self.finish_job(id, &row, result, Some((&meta, &paths, quality)))
            .await
    }

    /// Resolve metadata, output paths, and quality for a row before the
    /// retry loop; all of it is stable across attempts
    async fn prepare_job(
        &self,
        row: &QueueItem,
        settings: &Settings,
        token: &CancellationToken,
    ) -> Result<(Arc<TrackMetadata>, Arc<TrackPaths>, Quality)> {
        let quality = settings.quality()?;

        let meta = match row.metadata() {
            Ok(meta) => meta,
            Err(_) => {
                let api = Arc::clone(&self.api);
                let id = row.id.clone();
                let track = self
                    .recovery
                    .execute(token, "track_lookup", move |_| {
                        let api = Arc::clone(&api);
                        let id = id.clone();
                        async move { api.track(&id).await }
                    })
                    .await?;
                let meta = TrackMetadata::from_track(track);

                let mut enriched = row.clone();
                enriched.title = meta.track.title.clone();
                enriched.artist = meta.track.artist.clone();
                enriched.album = meta.track.album.clone();
                enriched.metadata_json = Some(serde_json::to_string(&meta)?);
                self.store.update_item(&enriched).await?;
                meta
            }
        };

        let placement = match row.parent_id.as_deref() {
            Some(parent) if parent.starts_with("album_") => TrackPlacement::AlbumTrack,
            Some(_) => TrackPlacement::PlaylistTrack,
            None => TrackPlacement::Single,
        };

        let mut paths = plan_track_paths(&settings.download, &meta, placement, quality)?;
        // A part file recorded by a previous session wins over the plan,
        // otherwise resume state would be orphaned by a template change
        if let Some(ref stored) = row.partial_file_path {
            if !stored.is_empty() && Path::new(stored).exists() {
                paths.part_path = PathBuf::from(stored);
            }
        }

        Ok((Arc::new(meta), Arc::new(paths), quality))
    }

    fn spawn_progress_flusher(
        &self,
        id: String,
        title: String,
        part_path: PathBuf,
        rx: watch::Receiver<(u64, u64)>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let mut speed = SpeedTracker::new();
            let mut interval = tokio::time::interval(PROGRESS_FLUSH_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last = *rx.borrow();
            loop {
                interval.tick().await;
                let current = *rx.borrow();
                if current == last {
                    continue;
                }
                last = current;
                let (bytes, total) = current;
                speed.add_position(bytes);
                let percent = ProgressUpdate::percent(bytes, total);

                if let Err(err) = store
                    .update_progress(
                        &id,
                        percent,
                        bytes,
                        total,
                        Some(&part_path.to_string_lossy()),
                    )
                    .await
                {
                    tracing::warn!(id = %id, error = %err, "progress flush failed");
                }
                notifier.progress(&ProgressUpdate {
                    id: id.clone(),
                    title: title.clone(),
                    bytes_downloaded: bytes,
                    total_bytes: total,
                    progress: percent,
                    speed_bps: speed.average_bps(),
                });
            }
        })
    }

    /// Settle the row after the pipeline returned, emit notifications,
    /// and run the parent accounting
    async fn finish_job(
        &self,
        id: &str,
        row: &QueueItem,
        result: Result<TrackOutcome>,
        prepared: Option<(&Arc<TrackMetadata>, &Arc<TrackPaths>, Quality)>,
    ) -> Result<()> {
        match result {
            Ok(outcome) => {
                let output = outcome.output_path.to_string_lossy().into_owned();

                if let Some((meta, _, quality)) = prepared {
                    self.store
                        .history_append(&HistoryEntry {
                            id: 0,
                            track_id: id.to_string(),
                            title: meta.track.title.clone(),
                            artist: meta.track.artist.clone(),
                            album: meta.track.album.clone(),
                            quality: quality.as_str().to_string(),
                            output_path: output.clone(),
                            file_size: outcome.total_bytes,
                            downloaded_at: Utc::now().to_rfc3339(),
                        })
                        .await?;
                }

                let transition = self
                    .store
                    .complete_track(id, &output, outcome.total_bytes)
                    .await?;

                self.notifier.progress(&ProgressUpdate {
                    id: id.to_string(),
                    title: row.title.clone(),
                    bytes_downloaded: outcome.total_bytes,
                    total_bytes: outcome.total_bytes,
                    progress: 100.0,
                    speed_bps: 0.0,
                });
                self.notifier.status(&StatusUpdate {
                    id: id.to_string(),
                    status: ItemStatus::Completed,
                    error: None,
                });
                self.notify_parent_transition(transition);
                self.notifier.queue_changed();
                Ok(())
            }
            Err(WavesinkError::Cancelled) => {
                let Some(current) = self.store.get_item(id).await? else {
                    // Cancel already removed the row
                    return Ok(());
                };

                let disk_bytes = match prepared {
                    Some((_, paths, _)) => tokio::fs::metadata(&paths.part_path)
                        .await
                        .ok()
                        .map(|m| m.len()),
                    None => None,
                };
                self.store.mark_paused(id, disk_bytes).await?;

                if current.status != ItemStatus::Paused {
                    self.notifier.status(&StatusUpdate {
                        id: id.to_string(),
                        status: ItemStatus::Paused,
                        error: None,
                    });
                }
                self.notifier.queue_changed();
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    operation = "download_track",
                    id = %id,
                    category = err.category().as_str(),
                    error = %err,
                    "track failed"
                );
                let message = err.to_string();
                let transition = self.store.fail_track(id, &message).await?;

                self.notifier.status(&StatusUpdate {
                    id: id.to_string(),
                    status: ItemStatus::Failed,
                    error: Some(message),
                });
                self.notify_parent_transition(transition);
                self.notifier.queue_changed();
                Ok(())
            }
        }
    }

    fn notify_parent_transition(&self, transition: Option<ParentTransition>) {
        if let Some(transition) = transition {
            tracing::info!(
                parent = %transition.parent_id,
                status = transition.status.as_str(),
                completed = transition.completed_tracks,
                failed = transition.failed_tracks,
                total = transition.total_tracks,
                "parent settled"
            );
            self.notifier.status(&StatusUpdate {
                id: transition.parent_id,
                status: transition.status,
                error: None,
            });
        }
    }

    // ========================================================================
    // Read side for the facade
    // ========================================================================

    pub async fn queue_page(
        &self,
        offset: u32,
        limit: u32,
        filter: Option<ItemStatus>,
    ) -> Result<QueuePage> {
        self.store.list_queue(offset, limit, filter).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.store.stats().await
    }

    pub async fn clear_completed(&self) -> Result<u64> {
        let removed = self.store.clear_completed().await?;
        self.notifier.queue_changed();
        Ok(removed)
    }

    pub async fn failed_tracks(&self, parent_id: &str) -> Result<Vec<FailedTrack>> {
        self.store.failed_tracks(parent_id).await
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}
