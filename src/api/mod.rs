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


//! Interface to the external service API client
//!
//! The wire client lives outside this crate; the core only depends on the
//! [`ServiceApi`] capability and the typed records in [`models`]. Tests
//! and the desktop shell inject their own implementations.

pub mod models;

use crate::error::Result;
use async_trait::async_trait;

pub use models::{
    Album, CustomPlaylist, Lyrics, Playlist, Quality, SearchKind, SearchPage, Track, TrackMetadata,
};

/// Read access to the streaming service catalog and content endpoints.
///
/// Implementations are expected to surface errors through the crate's
/// taxonomy (`auth` on credential rejection, `rate_limit` on 429,
/// `not_found` on missing entities) so the recovery layer can react.
#[async_trait]
pub trait ServiceApi: Send + Sync {
    /// Full-text catalog search
    async fn search(&self, query: &str, kind: SearchKind, limit: u32) -> Result<SearchPage>;

    /// Track lookup by service id
    async fn track(&self, id: &str) -> Result<Track>;

    /// Album lookup including the track listing
    async fn album(&self, id: &str) -> Result<Album>;

    /// Artist document, passed through to the UI untyped
    async fn artist(&self, id: &str) -> Result<serde_json::Value>;

    /// Playlist lookup including the track listing
    async fn playlist(&self, id: &str) -> Result<Playlist>;

    /// Editorial charts document, passed through to the UI untyped
    async fn charts(&self) -> Result<serde_json::Value>;

    /// Resolve the streaming URL for a track at the requested quality.
    ///
    /// Must fail with a `not_found` error when the quality is not
    /// available for the track.
    async fn stream_url(&self, track: &Track, quality: Quality) -> Result<String>;

    /// Lyrics for a track; `Ok(None)` when the service has none
    async fn lyrics(&self, track_id: &str) -> Result<Option<Lyrics>>;

    /// Fetch cover art at the given pixel size
    async fn cover_art(&self, url: &str, size: u32) -> Result<Vec<u8>>;
}

/// Refreshes the session token after an auth failure.
///
/// The recovery manager holds the only call site and serializes calls
/// behind a single-flight mutex.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}
