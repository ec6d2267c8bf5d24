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


//! Settings document and validation
//!
//! The configuration lives in `settings.json` under the per-user data
//! directory. Every section tolerates missing keys via serde defaults so
//! old settings files keep loading after upgrades. The ARL credential is
//! never left in the file: a plaintext value found on load is moved into
//! the secret store and the file is rewritten with a sentinel.

pub mod secret;

use crate::api::models::Quality;
use crate::error::{Result, WavesinkError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sentinel written to `deezer.arl` once the real value lives in the
/// secret store
pub const ARL_STORED_SENTINEL: &str = "@secret-store";

/// Worker pool bounds
pub const MIN_CONCURRENT_DOWNLOADS: u32 = 1;
pub const MAX_CONCURRENT_DOWNLOADS: u32 = 32;

/// Retry bound for the scheduler
pub const MAX_CONFIGURABLE_RETRIES: u32 = 10;

fn default_quality() -> String {
    "MP3_320".to_string()
}
fn default_concurrency() -> u32 {
    8
}
fn default_true() -> bool {
    true
}
fn default_artwork_size() -> u32 {
    1000
}
fn default_cover_filename() -> String {
    "cover.jpg".to_string()
}
fn default_single_track_template() -> String {
    "{artist} - {title}".to_string()
}
fn default_album_track_template() -> String {
    "{track_number:02d} - {title}".to_string()
}
fn default_playlist_track_template() -> String {
    "{playlist_position:02d} - {artist} - {title}".to_string()
}
fn default_playlist_folder_template() -> String {
    "{playlist}".to_string()
}
fn default_artist_folder_template() -> String {
    "{artist}".to_string()
}
fn default_album_folder_template() -> String {
    "{album}".to_string()
}
fn default_cd_folder_template() -> String {
    "CD {disc_number}".to_string()
}
fn default_output_dir() -> PathBuf {
    dirs::audio_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Wavesink")
}
fn default_timeout() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_connections_per_dl() -> u32 {
    1
}
fn default_language() -> String {
    "en".to_string()
}
fn default_theme() -> String {
    "dark".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_log_output() -> String {
    "file".to_string()
}
fn default_log_max_size() -> u64 {
    10
}
fn default_log_max_backups() -> u32 {
    5
}
fn default_log_max_age() -> u32 {
    30
}

/// Service credential section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeezerSettings {
    /// ARL session token. Plaintext only transiently; see module docs.
    #[serde(default)]
    pub arl: String,
}

/// Download behaviour section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_concurrency")]
    pub concurrent_downloads: u32,

    #[serde(default = "default_true")]
    pub embed_artwork: bool,
    #[serde(default = "default_artwork_size")]
    pub artwork_size: u32,
    #[serde(default)]
    pub save_album_cover: bool,
    #[serde(default = "default_cover_filename")]
    pub album_cover_filename: String,
    #[serde(default = "default_artwork_size")]
    pub album_cover_size: u32,

    #[serde(default = "default_single_track_template")]
    pub single_track_template: String,
    #[serde(default = "default_album_track_template")]
    pub album_track_template: String,
    #[serde(default = "default_playlist_track_template")]
    pub playlist_track_template: String,

    #[serde(default = "default_playlist_folder_template")]
    pub playlist_folder_template: String,
    #[serde(default = "default_artist_folder_template")]
    pub artist_folder_template: String,
    #[serde(default = "default_album_folder_template")]
    pub album_folder_template: String,
    #[serde(default = "default_cd_folder_template")]
    pub cd_folder_template: String,

    #[serde(default = "default_true")]
    pub create_playlist_folder: bool,
    #[serde(default = "default_true")]
    pub create_artist_folder: bool,
    #[serde(default = "default_true")]
    pub create_album_folder: bool,
    #[serde(default)]
    pub create_cd_folder: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            quality: default_quality(),
            concurrent_downloads: default_concurrency(),
            embed_artwork: true,
            artwork_size: default_artwork_size(),
            save_album_cover: false,
            album_cover_filename: default_cover_filename(),
            album_cover_size: default_artwork_size(),
            single_track_template: default_single_track_template(),
            album_track_template: default_album_track_template(),
            playlist_track_template: default_playlist_track_template(),
            playlist_folder_template: default_playlist_folder_template(),
            artist_folder_template: default_artist_folder_template(),
            album_folder_template: default_album_folder_template(),
            cd_folder_template: default_cd_folder_template(),
            create_playlist_folder: true,
            create_artist_folder: true,
            create_album_folder: true,
            create_cd_folder: false,
        }
    }
}

/// Lyrics handling section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub synced: bool,
    #[serde(default = "default_true")]
    pub unsynced: bool,
    #[serde(default = "default_true")]
    pub embed_unsynced: bool,
    #[serde(default)]
    pub embed_synced: bool,
    #[serde(default)]
    pub save_synced_file: bool,
    #[serde(default)]
    pub save_unsynced_file: bool,
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for LyricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            synced: true,
            unsynced: true,
            embed_unsynced: true,
            embed_synced: false,
            save_synced_file: false,
            save_unsynced_file: false,
            language: default_language(),
        }
    }
}

/// Network tuning section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Total request timeout for API calls, seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Scheduler retry budget per track
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Bytes per second per download; 0 disables throttling
    #[serde(default)]
    pub bandwidth_limit: u64,
    #[serde(default = "default_connections_per_dl")]
    pub connections_per_dl: u32,
    #[serde(default)]
    pub proxy_url: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            bandwidth_limit: 0,
            connections_per_dl: default_connections_per_dl(),
            proxy_url: String::new(),
        }
    }
}

/// UI hints; the core stores but never interprets these
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub minimize_to_tray: bool,
    #[serde(default)]
    pub start_minimized: bool,
    #[serde(default)]
    pub run_on_startup: bool,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            language: default_language(),
            minimize_to_tray: false,
            start_minimized: false,
            run_on_startup: false,
        }
    }
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
    /// "file", "stdout", or "both"
    #[serde(default = "default_log_output")]
    pub output: String,
    /// Override for the log directory; empty means `<data dir>/logs`
    #[serde(default)]
    pub file_path: String,
    #[serde(default = "default_log_max_size")]
    pub max_size_mb: u64,
    #[serde(default = "default_log_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_log_max_age")]
    pub max_age_days: u32,
    #[serde(default)]
    pub compress: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: default_log_output(),
            file_path: String::new(),
            max_size_mb: default_log_max_size(),
            max_backups: default_log_max_backups(),
            max_age_days: default_log_max_age(),
            compress: false,
        }
    }
}

/// The whole configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub deezer: DeezerSettings,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub lyrics: LyricsSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub system: SystemSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Parse and validate a settings document from disk.
    ///
    /// A missing file yields defaults and writes them back so the user has
    /// something to edit. A plaintext ARL is migrated into the secret
    /// store and the file rewritten with [`ARL_STORED_SENTINEL`].
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                WavesinkError::filesystem(format!("read {}: {e}", path.display()))
            })?;
            serde_json::from_str::<Settings>(&raw)
                .map_err(|e| WavesinkError::validation(format!("settings parse: {e}")))?
        } else {
            Settings::default()
        };

        if !settings.deezer.arl.is_empty() && settings.deezer.arl != ARL_STORED_SENTINEL {
            secret::store_arl(&settings.deezer.arl)?;
            settings.deezer.arl = ARL_STORED_SENTINEL.to_string();
            tracing::info!("migrated plaintext arl into the secret store");
        }

        settings.validate()?;
        settings.save(path)?;
        Ok(settings)
    }

    /// Write the document back, atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Resolve the real ARL, wherever it lives
    pub fn arl(&self) -> Result<String> {
        if !self.deezer.arl.is_empty() && self.deezer.arl != ARL_STORED_SENTINEL {
            return Ok(self.deezer.arl.clone());
        }
        secret::load_arl()
    }

    /// Parsed download quality
    pub fn quality(&self) -> Result<Quality> {
        Quality::parse(&self.download.quality)
    }

    /// Reject out-of-range or malformed values before anything uses them
    pub fn validate(&self) -> Result<()> {
        Quality::parse(&self.download.quality)?;

        let workers = self.download.concurrent_downloads;
        if !(MIN_CONCURRENT_DOWNLOADS..=MAX_CONCURRENT_DOWNLOADS).contains(&workers) {
            return Err(WavesinkError::validation(format!(
                "concurrent_downloads must be in [{MIN_CONCURRENT_DOWNLOADS}, {MAX_CONCURRENT_DOWNLOADS}], got {workers}"
            )));
        }

        if self.network.max_retries > MAX_CONFIGURABLE_RETRIES {
            return Err(WavesinkError::validation(format!(
                "max_retries must be at most {MAX_CONFIGURABLE_RETRIES}, got {}",
                self.network.max_retries
            )));
        }

        if self.network.timeout == 0 {
            return Err(WavesinkError::validation("timeout must be positive"));
        }

        if !self.network.proxy_url.is_empty() {
            url::Url::parse(&self.network.proxy_url)
                .map_err(|e| WavesinkError::validation(format!("proxy_url: {e}")))?;
        }

        for (name, template) in [
            ("single_track_template", &self.download.single_track_template),
            ("album_track_template", &self.download.album_track_template),
            (
                "playlist_track_template",
                &self.download.playlist_track_template,
            ),
        ] {
            if template.trim().is_empty() {
                return Err(WavesinkError::validation(format!("{name} is empty")));
            }
        }

        if self.download.output_dir.as_os_str().is_empty() {
            return Err(WavesinkError::validation("output_dir is empty"));
        }

        for (name, size) in [
            ("artwork_size", self.download.artwork_size),
            ("album_cover_size", self.download.album_cover_size),
        ] {
            if !(100..=1800).contains(&size) {
                return Err(WavesinkError::validation(format!(
                    "{name} must be in [100, 1800], got {size}"
                )));
            }
        }

        if self.download.save_album_cover && self.download.album_cover_filename.trim().is_empty() {
            return Err(WavesinkError::validation("album_cover_filename is empty"));
        }

        Ok(())
    }
}

/// Per-user application data directory (`settings.json`, `data/`, `logs/`)
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wavesink")
}

/// Default location of the settings document
pub fn default_settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Location of the queue database
pub fn database_path(base: &Path) -> PathBuf {
    base.join("data").join("queue.db")
}

/// Location of the log directory
pub fn logs_dir(base: &Path) -> PathBuf {
    base.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn empty_document_fills_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.download.quality, "MP3_320");
        assert_eq!(settings.download.concurrent_downloads, 8);
        assert_eq!(settings.network.max_retries, 3);
        assert!(settings.download.create_album_folder);
    }

    #[test]
    fn rejects_out_of_range_workers() {
        let mut settings = Settings::default();
        settings.download.concurrent_downloads = 0;
        assert!(settings.validate().is_err());
        settings.download.concurrent_downloads = 33;
        assert!(settings.validate().is_err());
        settings.download.concurrent_downloads = 32;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_bad_quality_and_proxy() {
        let mut settings = Settings::default();
        settings.download.quality = "OGG".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.network.proxy_url = "not a url".into();
        assert!(settings.validate().is_err());
        settings.network.proxy_url = "socks5://127.0.0.1:9050".into();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.download.quality = "FLAC".into();
        settings.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let back: Settings = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.download.quality, "FLAC");
    }
}
