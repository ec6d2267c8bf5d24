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


//! Queue row types
//!
//! One table holds both parents (albums, playlists) and their child
//! tracks; `parent_id` is a self-reference. Splitting them apart would
//! complicate the statistics query and the terminal-transition
//! accounting, so the single-table shape is deliberate.

use crate::api::models::TrackMetadata;
use crate::error::{Result, WavesinkError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Kind of queue row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Track,
    Album,
    Playlist,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Track => "track",
            ItemType::Album => "album",
            ItemType::Playlist => "playlist",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "track" => Ok(ItemType::Track),
            "album" => Ok(ItemType::Album),
            "playlist" => Ok(ItemType::Playlist),
            other => Err(WavesinkError::internal(format!("bad item type: {other}"))),
        }
    }

    /// Albums and playlists contain child track rows
    pub fn is_parent(&self) -> bool {
        matches!(self, ItemType::Album | ItemType::Playlist)
    }
}

/// Lifecycle state of a queue row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Paused,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Downloading => "downloading",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "downloading" => Ok(ItemStatus::Downloading),
            "completed" => Ok(ItemStatus::Completed),
            "failed" => Ok(ItemStatus::Failed),
            "paused" => Ok(ItemStatus::Paused),
            other => Err(WavesinkError::internal(format!("bad status: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }
}

/// Id prefix helpers: parent rows share the table with tracks, so their
/// ids are namespaced
pub fn album_row_id(album_id: &str) -> String {
    format!("album_{album_id}")
}

pub fn playlist_row_id(playlist_id: &str) -> String {
    format!("playlist_{playlist_id}")
}

/// One row of `queue_items`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub status: ItemStatus,
    /// 0..100; for parents derived from child progress when listed
    pub progress: f64,
    pub download_url: Option<String>,
    pub output_path: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    /// Serialized [`TrackMetadata`] for tracks; opaque to the store
    pub metadata_json: Option<String>,
    pub partial_file_path: Option<String>,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub parent_id: Option<String>,
    pub total_tracks: u32,
    pub completed_tracks: u32,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl QueueItem {
    /// Leaf track row; `parent` is set when the track was admitted as part
    /// of an album or playlist expansion
    pub fn new_track(metadata: &TrackMetadata, parent: Option<&str>) -> Result<Self> {
        let now = Utc::now().to_rfc3339();
        Ok(Self {
            id: metadata.track.id.clone(),
            item_type: ItemType::Track,
            title: metadata.track.title.clone(),
            artist: metadata.track.artist.clone(),
            album: metadata.track.album.clone(),
            status: ItemStatus::Pending,
            progress: 0.0,
            download_url: None,
            output_path: None,
            error_message: None,
            retry_count: 0,
            metadata_json: Some(serde_json::to_string(metadata)?),
            partial_file_path: None,
            bytes_downloaded: 0,
            total_bytes: 0,
            parent_id: parent.map(str::to_string),
            total_tracks: 0,
            completed_tracks: 0,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        })
    }

    /// Bare track row for admission before the metadata lookup has run;
    /// the worker fills in display fields once it resolves the track
    pub fn placeholder_track(id: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: id.to_string(),
            item_type: ItemType::Track,
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            status: ItemStatus::Pending,
            progress: 0.0,
            download_url: None,
            output_path: None,
            error_message: None,
            retry_count: 0,
            metadata_json: None,
            partial_file_path: None,
            bytes_downloaded: 0,
            total_bytes: 0,
            parent_id: None,
            total_tracks: 0,
            completed_tracks: 0,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        }
    }

    /// Parent row for an album or playlist expecting `total_tracks`
    /// children
    pub fn new_parent(
        id: String,
        item_type: ItemType,
        title: &str,
        artist: &str,
        total_tracks: u32,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id,
            item_type,
            title: title.to_string(),
            artist: artist.to_string(),
            album: title.to_string(),
            status: ItemStatus::Downloading,
            progress: 0.0,
            download_url: None,
            output_path: None,
            error_message: None,
            retry_count: 0,
            metadata_json: None,
            partial_file_path: None,
            bytes_downloaded: 0,
            total_bytes: 0,
            parent_id: None,
            total_tracks,
            completed_tracks: 0,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_parent(&self) -> bool {
        self.item_type.is_parent()
    }

    /// A partially transferred row the downloader can continue instead of
    /// restarting
    pub fn is_resumable(&self) -> bool {
        self.partial_file_path
            .as_deref()
            .map(|p| !p.is_empty())
            .unwrap_or(false)
            && self.bytes_downloaded > 0
            && self.total_bytes > 0
    }

    /// Partial success: terminal, but some children never made it
    pub fn is_partial_success(&self) -> bool {
        self.is_parent()
            && self.status == ItemStatus::Completed
            && self.completed_tracks < self.total_tracks
    }

    /// Deserialized tagger input
    pub fn metadata(&self) -> Result<TrackMetadata> {
        let raw = self
            .metadata_json
            .as_deref()
            .ok_or_else(|| WavesinkError::internal(format!("no metadata on row {}", self.id)))?;
        Ok(serde_json::from_str(raw)?)
    }

    /// Map a `queue_items` row. Column order does not matter; lookups are
    /// by name.
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let item_type = ItemType::parse(&row.try_get::<String, _>("item_type")?)?;
        let status = ItemStatus::parse(&row.try_get::<String, _>("status")?)?;
        Ok(Self {
            id: row.try_get("id")?,
            item_type,
            title: row.try_get("title")?,
            artist: row.try_get("artist")?,
            album: row.try_get("album")?,
            status,
            progress: row.try_get("progress")?,
            download_url: row.try_get("download_url")?,
            output_path: row.try_get("output_path")?,
            error_message: row.try_get("error_message")?,
            retry_count: row.try_get::<i64, _>("retry_count")? as u32,
            metadata_json: row.try_get("metadata_json")?,
            partial_file_path: row.try_get("partial_file_path")?,
            bytes_downloaded: row.try_get::<i64, _>("bytes_downloaded")? as u64,
            total_bytes: row.try_get::<i64, _>("total_bytes")? as u64,
            parent_id: row.try_get("parent_id")?,
            total_tracks: row.try_get::<i64, _>("total_tracks")? as u32,
            completed_tracks: row.try_get::<i64, _>("completed_tracks")? as u32,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// Status-bucket counts over parent rows, as shown in the UI header
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub downloading: u64,
    pub completed: u64,
    pub failed: u64,
    pub paused: u64,
    pub total: u64,
}

/// One page of the queue listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePage {
    pub items: Vec<QueueItem>,
    pub total: u64,
    pub offset: u32,
    pub limit: u32,
}

/// Append-only record of a successfully written file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub id: i64,
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub quality: String,
    pub output_path: String,
    pub file_size: u64,
    pub downloaded_at: String,
}

impl HistoryEntry {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            track_id: row.try_get("track_id")?,
            title: row.try_get("title")?,
            artist: row.try_get("artist")?,
            album: row.try_get("album")?,
            quality: row.try_get("quality")?,
            output_path: row.try_get("output_path")?,
            file_size: row.try_get::<i64, _>("file_size")? as u64,
            downloaded_at: row.try_get("downloaded_at")?,
        })
    }
}

/// A failed child the UI lists on a partial-success parent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTrack {
    #[serde(default)]
    pub id: i64,
    pub parent_id: String,
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub error_message: String,
    pub failed_at: String,
}

impl FailedTrack {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            parent_id: row.try_get("parent_id")?,
            track_id: row.try_get("track_id")?,
            title: row.try_get("title")?,
            artist: row.try_get("artist")?,
            error_message: row.try_get("error_message")?,
            failed_at: row.try_get("failed_at")?,
        })
    }
}

/// Reported by the child-accounting transaction when a parent reached a
/// terminal state
#[derive(Debug, Clone)]
pub struct ParentTransition {
    pub parent_id: String,
    pub status: ItemStatus,
    pub completed_tracks: u32,
    pub failed_tracks: u32,
    pub total_tracks: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Track;

    fn track() -> Track {
        Track {
            id: "7001".into(),
            title: "Glass Harbor".into(),
            artist: "Mira Voss".into(),
            album: "Tidelines".into(),
            album_artist: None,
            track_number: Some(1),
            disc_number: Some(1),
            isrc: None,
            duration_seconds: Some(187),
            cover_url: None,
            release_year: Some(2023),
        }
    }

    #[test]
    fn resumable_needs_all_three_fields() {
        let meta = TrackMetadata::from_track(track());
        let mut item = QueueItem::new_track(&meta, None).unwrap();
        assert!(!item.is_resumable());

        item.partial_file_path = Some("/tmp/x.part".into());
        assert!(!item.is_resumable());

        item.bytes_downloaded = 1024;
        assert!(!item.is_resumable());

        item.total_bytes = 4096;
        assert!(item.is_resumable());

        item.partial_file_path = Some(String::new());
        assert!(!item.is_resumable());
    }

    #[test]
    fn partial_success_predicate() {
        let mut parent = QueueItem::new_parent(
            album_row_id("42"),
            ItemType::Album,
            "Tidelines",
            "Mira Voss",
            12,
        );
        assert!(!parent.is_partial_success());

        parent.status = ItemStatus::Completed;
        parent.completed_tracks = 10;
        assert!(parent.is_partial_success());

        parent.completed_tracks = 12;
        assert!(!parent.is_partial_success());
    }

    #[test]
    fn parent_ids_are_prefixed() {
        assert_eq!(album_row_id("99"), "album_99");
        assert_eq!(playlist_row_id("15"), "playlist_15");
    }

    #[test]
    fn metadata_round_trips_through_row_json() {
        let meta = TrackMetadata::from_track(track());
        let item = QueueItem::new_track(&meta, Some("album_42")).unwrap();
        let back = item.metadata().unwrap();
        assert_eq!(back.track.title, "Glass Harbor");
        assert_eq!(item.parent_id.as_deref(), Some("album_42"));
    }
}
