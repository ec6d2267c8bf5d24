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


//! Typed records exchanged with the service API client
//!
//! Entities stay statically typed inside the core; JSON only appears at
//! the facade boundary and in the queue row's `metadata_json` column,
//! which stores a serialized [`TrackMetadata`].

use crate::error::{Result, WavesinkError};
use serde::{Deserialize, Serialize};

/// Audio quality the user can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "MP3_320")]
    Mp3_320,
    #[serde(rename = "FLAC")]
    Flac,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Mp3_320 => "MP3_320",
            Quality::Flac => "FLAC",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "MP3_320" => Ok(Quality::Mp3_320),
            "FLAC" => Ok(Quality::Flac),
            other => Err(WavesinkError::validation(format!(
                "unknown quality: {other}"
            ))),
        }
    }

    /// File extension for the finished audio file
    pub fn extension(&self) -> &'static str {
        match self {
            Quality::Mp3_320 => "mp3",
            Quality::Flac => "flac",
        }
    }
}

/// What a search query should match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Track,
    Album,
    Artist,
    Playlist,
}

impl SearchKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "track" => Ok(SearchKind::Track),
            "album" => Ok(SearchKind::Album),
            "artist" => Ok(SearchKind::Artist),
            "playlist" => Ok(SearchKind::Playlist),
            other => Err(WavesinkError::validation(format!(
                "unknown search type: {other}"
            ))),
        }
    }
}

/// One page of search results, already shaped for the facade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    pub data: Vec<serde_json::Value>,
    pub total: u64,
}

/// A single track as the service describes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(default)]
    pub album_artist: Option<String>,
    #[serde(default)]
    pub track_number: Option<u32>,
    #[serde(default)]
    pub disc_number: Option<u32>,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub release_year: Option<u32>,
}

/// An album with its track listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub release_year: Option<u32>,
    pub tracks: Vec<Track>,
}

/// A playlist with its track listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub cover_url: Option<String>,
    pub tracks: Vec<Track>,
}

/// User-supplied playlist imported from another service: a flat list of
/// track ids with display metadata, no lookup round-trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPlaylist {
    pub name: String,
    pub tracks: Vec<Track>,
}

/// Lyrics payload for a track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lyrics {
    /// Plain text lyrics
    #[serde(default)]
    pub unsynced: Option<String>,
    /// LRC-formatted timestamped lyrics
    #[serde(default)]
    pub synced: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Everything the tagger needs for one track, persisted as
/// `metadata_json` on the queue row so a restart never repeats the
/// metadata lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMetadata {
    #[serde(flatten)]
    pub track: Track,
    /// Playlist name when the track was admitted through a playlist
    #[serde(default)]
    pub playlist: Option<String>,
    /// 1-based position within that playlist
    #[serde(default)]
    pub playlist_position: Option<u32>,
}

impl TrackMetadata {
    pub fn from_track(track: Track) -> Self {
        Self {
            track,
            playlist: None,
            playlist_position: None,
        }
    }

    pub fn in_playlist(track: Track, playlist: &str, position: u32) -> Self {
        Self {
            track,
            playlist: Some(playlist.to_string()),
            playlist_position: Some(position),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_round_trip() {
        assert_eq!(Quality::parse("FLAC").unwrap(), Quality::Flac);
        assert_eq!(Quality::parse("MP3_320").unwrap(), Quality::Mp3_320);
        assert!(Quality::parse("MP3_128").is_err());
        assert_eq!(Quality::Flac.extension(), "flac");
    }

    #[test]
    fn track_metadata_survives_json() {
        let meta = TrackMetadata::in_playlist(
            Track {
                id: "1001".into(),
                title: "Night Drive".into(),
                artist: "Velour City".into(),
                album: "Afterglow".into(),
                album_artist: None,
                track_number: Some(3),
                disc_number: Some(1),
                isrc: Some("USABC2400001".into()),
                duration_seconds: Some(214),
                cover_url: None,
                release_year: Some(2024),
            },
            "Summer Mix",
            7,
        );
        let json = serde_json::to_string(&meta).unwrap();
        let back: TrackMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.track.id, "1001");
        assert_eq!(back.playlist.as_deref(), Some("Summer Mix"));
        assert_eq!(back.playlist_position, Some(7));
    }
}
