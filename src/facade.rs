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


//! Host facade
//!
//! The stable surface the desktop shell drives. Complex data crosses as
//! JSON strings; actions return integer codes (`0` success, distinct
//! negatives per failure mode). Internally everything stays typed; JSON
//! exists only here. Registered callbacks are adapted into the core's
//! [`Notifier`] capability and invoked from worker tasks, so callback
//! bodies must hand work off to the UI thread themselves.

use crate::api::models::{Quality, SearchKind};
use crate::api::{ServiceApi, TokenRefresher};
use crate::app::App;
use crate::config::{self, Settings};
use crate::crypto::ContentDecryptor;
use crate::download::{
    DownloadManager, Downloader, Notifier, ProgressUpdate, StatusUpdate,
};
use crate::error::{Result, WavesinkError};
use crate::net::HttpClients;
use crate::recovery::RecoveryManager;
use crate::retry::RetryConfig;
use crate::store::{ItemStatus, Store};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tracing_appender::non_blocking::WorkerGuard;

/// Action result codes shared with the shell
pub mod codes {
    pub const OK: i32 = 0;
    pub const NOT_INITIALIZED: i32 = -1;
    pub const INVALID_CONFIG: i32 = -2;
    pub const VALIDATION_FAILED: i32 = -3;
    pub const DATABASE_ERROR: i32 = -4;
    pub const MIGRATION_FAILED: i32 = -5;
    pub const SCHEDULER_FAILED: i32 = -6;
    pub const OPERATION_FAILED: i32 = -7;
    pub const FILESYSTEM_ERROR: i32 = -8;
    pub const ALREADY_QUEUED: i32 = -9;
}

fn code_for(err: &WavesinkError) -> i32 {
    match err {
        WavesinkError::AlreadyQueued(_) => codes::ALREADY_QUEUED,
        WavesinkError::Validation(_) | WavesinkError::Json(_) => codes::VALIDATION_FAILED,
        WavesinkError::Migration(_) => codes::MIGRATION_FAILED,
        WavesinkError::Database(_) => codes::DATABASE_ERROR,
        WavesinkError::Io(_) | WavesinkError::Filesystem { .. } => codes::FILESYSTEM_ERROR,
        _ => codes::OPERATION_FAILED,
    }
}

fn error_json(err: &WavesinkError) -> String {
    json!({ "error": err.to_string() }).to_string()
}

/// Callback receiving one JSON document per event
pub type JsonCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Adapts the shell's registered callbacks to the internal notifier.
/// One slot per channel, mutex-guarded; re-registering replaces.
#[derive(Default)]
pub struct CallbackNotifier {
    progress: Mutex<Option<JsonCallback>>,
    status: Mutex<Option<JsonCallback>>,
    queue: Mutex<Option<JsonCallback>>,
}

impl CallbackNotifier {
    fn emit(slot: &Mutex<Option<JsonCallback>>, payload: &str) {
        let guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cb) = guard.as_ref() {
            cb(payload);
        }
    }
}

impl Notifier for CallbackNotifier {
    fn progress(&self, update: &ProgressUpdate) {
        if let Ok(payload) = serde_json::to_string(update) {
            Self::emit(&self.progress, &payload);
        }
    }

    fn status(&self, update: &StatusUpdate) {
        if let Ok(payload) = serde_json::to_string(update) {
            Self::emit(&self.status, &payload);
        }
    }

    fn queue_changed(&self) {
        Self::emit(&self.queue, "{}");
    }
}

/// Everything that only exists between Initialize and Shutdown
struct Core {
    app: Arc<App>,
    store: Arc<Store>,
    manager: Arc<DownloadManager>,
    settings: Arc<RwLock<Settings>>,
    settings_path: PathBuf,
    _log_guard: Option<WorkerGuard>,
}

/// The facade value the shell owns for the process lifetime.
///
/// External collaborators (service client, decryption primitive, token
/// refresher) are injected at construction; everything else is built by
/// [`initialize`](Self::initialize).
pub struct WavesinkHost {
    runtime: tokio::runtime::Runtime,
    api: Arc<dyn ServiceApi>,
    decryptor: Arc<dyn ContentDecryptor>,
    refresher: Arc<dyn TokenRefresher>,
    notifier: Arc<CallbackNotifier>,
    core: Mutex<Option<Core>>,
}

impl WavesinkHost {
    pub fn new(
        api: Arc<dyn ServiceApi>,
        decryptor: Arc<dyn ContentDecryptor>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| WavesinkError::internal(format!("runtime: {e}")))?;
        Ok(Self {
            runtime,
            api,
            decryptor,
            refresher,
            notifier: Arc::new(CallbackNotifier::default()),
            core: Mutex::new(None),
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bring the core up from a settings document. Idempotent; a second
    /// call on a live core is a no-op success.
    pub fn initialize(&self, config_path: &str) -> i32 {
        let mut core_slot = self.core.lock().unwrap_or_else(|e| e.into_inner());
        if core_slot.is_some() {
            return codes::OK;
        }

        let settings_path = if config_path.is_empty() {
            config::default_settings_path()
        } else {
            PathBuf::from(config_path)
        };
        let base_dir = settings_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(config::data_dir);

        let settings = match Settings::load(&settings_path) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::error!(operation = "initialize", error = %err, "settings load failed");
                return codes::INVALID_CONFIG;
            }
        };

        let log_guard = logging_guard(&settings, &base_dir);

        let result: Result<Core> = self.runtime.block_on(async {
            let store = Arc::new(Store::open(config::database_path(&base_dir)).await?);

            let clients = HttpClients::build(&settings.network)?;
            let retry = RetryConfig {
                max_retries: settings.network.max_retries,
                ..RetryConfig::default()
            }
            .with_jitter();
            let recovery = Arc::new(RecoveryManager::new(Arc::clone(&self.refresher), retry));
            let downloader = Arc::new(Downloader::new(
                Arc::clone(&self.api),
                Arc::clone(&self.decryptor),
                clients,
            ));

            let app = Arc::new(App::new());
            let shared_settings = Arc::new(RwLock::new(settings));
            let manager = DownloadManager::new(
                Arc::clone(&app),
                Arc::clone(&store),
                Arc::clone(&self.api),
                downloader,
                recovery,
                self.notifier.clone() as Arc<dyn Notifier>,
                Arc::clone(&shared_settings),
            );
            manager
                .start()
                .await
                .map_err(|e| WavesinkError::InvalidState(format!("scheduler start: {e}")))?;

            Ok(Core {
                app,
                store,
                manager,
                settings: shared_settings,
                settings_path,
                _log_guard: None,
            })
        });

        match result {
            Ok(mut core) => {
                core._log_guard = log_guard;
                tracing::info!("core initialized");
                *core_slot = Some(core);
                codes::OK
            }
            Err(err) => {
                tracing::error!(operation = "initialize", error = %err, "initialize failed");
                match err {
                    WavesinkError::Migration(_) => codes::MIGRATION_FAILED,
                    WavesinkError::Database(_) => codes::DATABASE_ERROR,
                    WavesinkError::Validation(_) => codes::INVALID_CONFIG,
                    WavesinkError::InvalidState(_) => codes::SCHEDULER_FAILED,
                    WavesinkError::Io(_) | WavesinkError::Filesystem { .. } => {
                        codes::FILESYSTEM_ERROR
                    }
                    _ => codes::OPERATION_FAILED,
                }
            }
        }
    }

    /// Drain workers, park in-flight rows, cancel the application
    /// context. The only legitimate cancellation of the app token.
    pub fn shutdown(&self) -> i32 {
        let core = {
            let mut slot = self.core.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        let Some(core) = core else {
            return codes::OK;
        };

        self.runtime.block_on(async {
            core.manager.stop_all().await;
            core.app.shutdown();
            core.store.database().close().await;
        });
        tracing::info!("core shut down");
        codes::OK
    }

    // ========================================================================
    // Callback registration
    // ========================================================================

    pub fn register_progress_callback(&self, callback: JsonCallback) {
        *self
            .notifier
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn register_status_callback(&self, callback: JsonCallback) {
        *self
            .notifier
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn register_queue_update_callback(&self, callback: JsonCallback) {
        *self
            .notifier
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    // ========================================================================
    // Catalog read-throughs
    // ========================================================================

    pub fn search(&self, query: &str, kind: &str, limit: u32) -> String {
        self.with_core_json(|_| {
            let kind = SearchKind::parse(kind)?;
            let page = self
                .runtime
                .block_on(self.api.search(query, kind, limit))?;
            Ok(json!({ "data": page.data, "total": page.total }).to_string())
        })
    }

    pub fn get_album(&self, id: &str) -> String {
        self.with_core_json(|_| {
            let album = self.runtime.block_on(self.api.album(id))?;
            Ok(serde_json::to_string(&album)?)
        })
    }

    pub fn get_artist(&self, id: &str) -> String {
        self.with_core_json(|_| {
            let artist = self.runtime.block_on(self.api.artist(id))?;
            Ok(artist.to_string())
        })
    }

    pub fn get_playlist(&self, id: &str) -> String {
        self.with_core_json(|_| {
            let playlist = self.runtime.block_on(self.api.playlist(id))?;
            Ok(serde_json::to_string(&playlist)?)
        })
    }

    pub fn get_charts(&self) -> String {
        self.with_core_json(|_| {
            let charts = self.runtime.block_on(self.api.charts())?;
            Ok(charts.to_string())
        })
    }

    // ========================================================================
    // Queue actions
    // ========================================================================

    pub fn download_track(&self, id: &str, quality: &str) -> i32 {
        self.with_core_code(|core| {
            self.apply_quality(core, quality)?;
            self.runtime.block_on(async {
                core.manager.start().await?;
                core.manager.download_track(id).await
            })
        })
    }

    pub fn download_album(&self, id: &str, quality: &str) -> i32 {
        self.with_core_code(|core| {
            self.apply_quality(core, quality)?;
            self.runtime.block_on(async {
                core.manager.start().await?;
                core.manager.download_album(id).await
            })
        })
    }

    pub fn download_playlist(&self, id: &str, quality: &str) -> i32 {
        self.with_core_code(|core| {
            self.apply_quality(core, quality)?;
            self.runtime.block_on(async {
                core.manager.start().await?;
                core.manager.download_playlist(id).await
            })
        })
    }

    pub fn download_custom_playlist(&self, payload: &str, quality: &str) -> i32 {
        self.with_core_code(|core| {
            self.apply_quality(core, quality)?;
            self.runtime.block_on(async {
                core.manager.start().await?;
                core.manager.download_custom_playlist(payload).await
            })
        })
    }

    pub fn pause_download(&self, id: &str) -> i32 {
        self.with_core_code(|core| self.runtime.block_on(core.manager.pause(id)))
    }

    pub fn resume_download(&self, id: &str) -> i32 {
        self.with_core_code(|core| {
            self.runtime.block_on(async {
                core.manager.start().await?;
                core.manager.resume(id).await
            })
        })
    }

    pub fn cancel_download(&self, id: &str) -> i32 {
        self.with_core_code(|core| self.runtime.block_on(core.manager.cancel(id)))
    }

    pub fn retry_download(&self, id: &str) -> i32 {
        self.with_core_code(|core| {
            self.runtime.block_on(async {
                core.manager.start().await?;
                core.manager.retry(id).await
            })
        })
    }

    pub fn clear_completed(&self) -> i32 {
        self.with_core_code(|core| {
            self.runtime
                .block_on(core.manager.clear_completed())
                .map(|_| ())
        })
    }

    pub fn stop_all(&self) -> i32 {
        self.with_core_code(|core| {
            self.runtime.block_on(core.manager.stop_all());
            Ok(())
        })
    }

    // ========================================================================
    // Queue reads
    // ========================================================================

    pub fn get_queue(&self, offset: u32, limit: u32, filter: &str) -> String {
        self.with_core_json(|core| {
            let filter = if filter.is_empty() {
                None
            } else {
                Some(ItemStatus::parse(filter).map_err(|_| {
                    WavesinkError::validation(format!("unknown status filter: {filter}"))
                })?)
            };
            let page = self
                .runtime
                .block_on(core.manager.queue_page(offset, limit, filter))?;
            Ok(serde_json::to_string(&page)?)
        })
    }

    pub fn get_queue_stats(&self) -> String {
        self.with_core_json(|core| {
            let stats = self.runtime.block_on(core.manager.queue_stats())?;
            Ok(serde_json::to_string(&stats)?)
        })
    }

    pub fn get_failed_tracks(&self, parent_id: &str) -> String {
        self.with_core_json(|core| {
            let failed = self
                .runtime
                .block_on(core.manager.failed_tracks(parent_id))?;
            Ok(serde_json::to_string(&failed)?)
        })
    }

    pub fn get_download_history(&self, offset: u32, limit: u32) -> String {
        self.with_core_json(|core| {
            let entries = self
                .runtime
                .block_on(core.store.history_page(offset, limit))?;
            Ok(serde_json::to_string(&entries)?)
        })
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn get_settings(&self) -> String {
        self.with_core_json(|core| {
            let settings = core
                .settings
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            Ok(serde_json::to_string(&settings)?)
        })
    }

    /// Validate, persist, and swap the live settings document
    pub fn update_settings(&self, payload: &str) -> i32 {
        self.with_core_code(|core| {
            let mut incoming: Settings = serde_json::from_str(payload)
                .map_err(|e| WavesinkError::validation(format!("settings: {e}")))?;
            incoming.validate()?;

            if !incoming.deezer.arl.is_empty()
                && incoming.deezer.arl != config::ARL_STORED_SENTINEL
            {
                config::secret::store_arl(&incoming.deezer.arl)?;
                incoming.deezer.arl = config::ARL_STORED_SENTINEL.to_string();
            }

            incoming.save(&core.settings_path)?;
            *core.settings.write().unwrap_or_else(|e| e.into_inner()) = incoming;
            Ok(())
        })
    }

    pub fn get_download_path(&self) -> String {
        self.with_core_json(|core| {
            let dir = core
                .settings
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .download
                .output_dir
                .clone();
            Ok(json!({ "path": dir.to_string_lossy() }).to_string())
        })
    }

    /// Point downloads at a new root; the directory must exist or be
    /// creatable
    pub fn set_download_path(&self, path: &str) -> i32 {
        self.with_core_code(|core| {
            if path.trim().is_empty() {
                return Err(WavesinkError::validation("download path is empty"));
            }
            let dir = PathBuf::from(path);
            std::fs::create_dir_all(&dir)?;

            let mut settings = core
                .settings
                .write()
                .unwrap_or_else(|e| e.into_inner());
            settings.download.output_dir = dir;
            let snapshot = settings.clone();
            drop(settings);

            snapshot.save(&core.settings_path)?;
            Ok(())
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn apply_quality(&self, core: &Core, quality: &str) -> Result<()> {
        if quality.is_empty() {
            return Ok(());
        }
        Quality::parse(quality)?;
        core.settings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .download
            .quality = quality.to_string();
        Ok(())
    }

    fn with_core_code<F>(&self, f: F) -> i32
    where
        F: FnOnce(&Core) -> Result<()>,
    {
        let slot = self.core.lock().unwrap_or_else(|e| e.into_inner());
        let Some(core) = slot.as_ref() else {
            return codes::NOT_INITIALIZED;
        };
        match f(core) {
            Ok(()) => codes::OK,
            Err(err) => {
                tracing::warn!(error = %err, "facade action failed");
                code_for(&err)
            }
        }
    }

    fn with_core_json<F>(&self, f: F) -> String
    where
        F: FnOnce(&Core) -> Result<String>,
    {
        let slot = self.core.lock().unwrap_or_else(|e| e.into_inner());
        let Some(core) = slot.as_ref() else {
            return error_json(&WavesinkError::InvalidState("not initialized".into()));
        };
        match f(core) {
            Ok(payload) => payload,
            Err(err) => error_json(&err),
        }
    }
}

fn logging_guard(settings: &Settings, base_dir: &std::path::Path) -> Option<WorkerGuard> {
    match crate::logging::init(&settings.logging, &config::logs_dir(base_dir)) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("wavesink: logging setup failed: {err}");
            None
        }
    }
}

/// Handy for shells that do not care about recovery: a refresher that
/// re-validates nothing and reports the credential as unrefreshable
pub struct NoopRefresher;

#[async_trait::async_trait]
impl TokenRefresher for NoopRefresher {
    async fn refresh(&self) -> Result<()> {
        Err(WavesinkError::auth("no token refresher configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let all = [
            codes::OK,
            codes::NOT_INITIALIZED,
            codes::INVALID_CONFIG,
            codes::VALIDATION_FAILED,
            codes::DATABASE_ERROR,
            codes::MIGRATION_FAILED,
            codes::SCHEDULER_FAILED,
            codes::OPERATION_FAILED,
            codes::FILESYSTEM_ERROR,
            codes::ALREADY_QUEUED,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn error_mapping_covers_the_distinct_modes() {
        assert_eq!(
            code_for(&WavesinkError::AlreadyQueued("album_1".into())),
            codes::ALREADY_QUEUED
        );
        assert_eq!(
            code_for(&WavesinkError::validation("bad")),
            codes::VALIDATION_FAILED
        );
        assert_eq!(
            code_for(&WavesinkError::Migration("v2".into())),
            codes::MIGRATION_FAILED
        );
        assert_eq!(
            code_for(&WavesinkError::filesystem("disk full")),
            codes::FILESYSTEM_ERROR
        );
        assert_eq!(
            code_for(&WavesinkError::not_found("x")),
            codes::OPERATION_FAILED
        );
    }

    #[test]
    fn error_json_shape() {
        let payload = error_json(&WavesinkError::not_found("track 9"));
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["error"], "not found: track 9");
    }
}
