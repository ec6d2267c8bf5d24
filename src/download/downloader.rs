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


//! Per-track download pipeline
//!
//! One call takes a queue row from "we know which track" to a tagged,
//! decrypted audio file in its final folder:
//!
//! resolve stream URL -> stream into `.part` (resumable) -> decrypt in
//! place -> artwork + lyrics -> tags -> promote to final path.
//!
//! Failures surface typed; the scheduler decides retry versus giving up.
//! `.part` files are never deleted on error, they are the resume state.

use crate::api::models::{Lyrics, Quality, TrackMetadata};
use crate::api::ServiceApi;
use crate::config::Settings;
use crate::crypto::ContentDecryptor;
use crate::error::{Result, WavesinkError};
use crate::file::TrackPaths;
use crate::net::{download_to_part, promote_part_file, supports_resume, DownloadRequest, HttpClients};
use crate::tag::{write_tags, TagRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Inputs for one pipeline run. Paths and metadata are resolved by the
/// scheduler before the retry loop so they stay stable across attempts.
pub struct TrackJob<'a> {
    pub track_id: &'a str,
    pub meta: &'a TrackMetadata,
    pub paths: &'a TrackPaths,
    pub quality: Quality,
    /// Resume state from the queue row
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub settings: &'a Settings,
    pub token: &'a CancellationToken,
}

/// What the pipeline produced
#[derive(Debug, Clone)]
pub struct TrackOutcome {
    pub output_path: PathBuf,
    pub total_bytes: u64,
}

/// Stateless pipeline over injected capabilities; cheap to share
pub struct Downloader {
    api: Arc<dyn ServiceApi>,
    decryptor: Arc<dyn ContentDecryptor>,
    clients: HttpClients,
}

impl Downloader {
    pub fn new(
        api: Arc<dyn ServiceApi>,
        decryptor: Arc<dyn ContentDecryptor>,
        clients: HttpClients,
    ) -> Self {
        Self {
            api,
            decryptor,
            clients,
        }
    }

    /// Run the whole pipeline for one track. `progress` receives
    /// `(bytes_downloaded, total_bytes)` during the streaming phase.
    pub async fn download_track<F>(&self, job: TrackJob<'_>, progress: &mut F) -> Result<TrackOutcome>
    where
        F: FnMut(u64, u64) + Send,
    {
        let url = self.api.stream_url(&job.meta.track, job.quality).await?;

        // Probe before resuming; a host that stopped advertising ranges
        // would otherwise hand us a full body glued after stale bytes
        let mut resume_from = job.bytes_downloaded;
        if resume_from > 0 {
            match supports_resume(&self.clients.media, &url).await {
                Ok(support) if !support.accept_ranges => {
                    tracing::debug!(track = job.track_id, "server lost range support, restarting");
                    resume_from = 0;
                }
                _ => {}
            }
        }

        let request = DownloadRequest {
            url,
            part_path: job.paths.part_path.clone(),
            bytes_downloaded: resume_from,
            total_bytes: job.total_bytes,
            headers: Vec::new(),
            bandwidth_limit: job.settings.network.bandwidth_limit,
        };
        let outcome =
            download_to_part(&self.clients.media, &request, job.token, progress).await?;

        if job.token.is_cancelled() {
            return Err(WavesinkError::Cancelled);
        }

        self.decrypt_in_place(job.track_id, &job.paths.part_path).await?;

        let artwork = self.fetch_artwork(&job).await;
        let lyrics = self.fetch_lyrics(&job).await;

        self.apply_tags(&job, artwork.as_deref(), lyrics.as_ref()).await?;
        self.write_sidecars(&job, artwork.as_deref(), lyrics.as_ref()).await?;

        if job.token.is_cancelled() {
            return Err(WavesinkError::Cancelled);
        }

        promote_part_file(&job.paths.part_path, &job.paths.final_path).await?;

        Ok(TrackOutcome {
            output_path: job.paths.final_path.clone(),
            total_bytes: outcome.bytes_downloaded,
        })
    }

    /// Decrypt the finished `.part` through the external primitive. The
    /// plaintext lands in a temp sibling first so a crash mid-write never
    /// corrupts the resume state.
    async fn decrypt_in_place(&self, track_id: &str, part_path: &Path) -> Result<()> {
        let key = self.decryptor.derive_key(track_id)?;
        let ciphertext = tokio::fs::read(part_path).await?;

        let decryptor = Arc::clone(&self.decryptor);
        let plaintext = tokio::task::spawn_blocking(move || decryptor.decrypt(&ciphertext, &key))
            .await
            .map_err(|e| WavesinkError::internal(format!("decrypt task: {e}")))??;

        let tmp = part_path.with_extension("part.dec");
        tokio::fs::write(&tmp, &plaintext).await?;
        tokio::fs::rename(&tmp, part_path).await?;
        Ok(())
    }

    /// Cover art is best effort: a missing or failing image never fails
    /// the track
    async fn fetch_artwork(&self, job: &TrackJob<'_>) -> Option<Vec<u8>> {
        let download = &job.settings.download;
        if !download.embed_artwork && !download.save_album_cover {
            return None;
        }
        let url = job.meta.track.cover_url.as_deref()?;

        match self.api.cover_art(url, download.artwork_size).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!(
                    operation = "fetch_artwork",
                    track = job.track_id,
                    error = %err,
                    "artwork fetch failed, continuing without"
                );
                None
            }
        }
    }

    /// Lyrics are best effort as well
    async fn fetch_lyrics(&self, job: &TrackJob<'_>) -> Option<Lyrics> {
        if !job.settings.lyrics.enabled {
            return None;
        }
        match self.api.lyrics(job.track_id).await {
            Ok(lyrics) => lyrics,
            Err(err) => {
                tracing::warn!(
                    operation = "fetch_lyrics",
                    track = job.track_id,
                    error = %err,
                    "lyrics fetch failed, continuing without"
                );
                None
            }
        }
    }

    async fn apply_tags(
        &self,
        job: &TrackJob<'_>,
        artwork: Option<&[u8]>,
        lyrics: Option<&Lyrics>,
    ) -> Result<()> {
        let lyrics_settings = &job.settings.lyrics;
        let embedded_lyrics = lyrics.and_then(|l| {
            if lyrics_settings.embed_synced {
                l.synced.clone().or_else(|| l.unsynced.clone())
            } else if lyrics_settings.embed_unsynced {
                l.unsynced.clone()
            } else {
                None
            }
        });

        let embedded_artwork = if job.settings.download.embed_artwork {
            artwork.map(|a| a.to_vec())
        } else {
            None
        };

        let meta = job.meta.clone();
        let path = job.paths.part_path.clone();
        let quality = job.quality;
        let language = lyrics_settings.language.clone();

        tokio::task::spawn_blocking(move || {
            write_tags(
                &path,
                quality,
                &TagRequest {
                    meta: &meta,
                    artwork: embedded_artwork.as_deref(),
                    lyrics: embedded_lyrics.as_deref(),
                    lyrics_language: &language,
                },
            )
        })
        .await
        .map_err(|e| WavesinkError::internal(format!("tag task: {e}")))?
    }

    /// Optional files next to the track: album cover (once per folder)
    /// and lyrics sidecars
    async fn write_sidecars(
        &self,
        job: &TrackJob<'_>,
        artwork: Option<&[u8]>,
        lyrics: Option<&Lyrics>,
    ) -> Result<()> {
        let download = &job.settings.download;
        if download.save_album_cover {
            if let Some(artwork) = artwork {
                let cover_path = job.paths.folder.join(&download.album_cover_filename);
                if !cover_path.exists() {
                    tokio::fs::create_dir_all(&job.paths.folder).await?;
                    tokio::fs::write(&cover_path, artwork).await?;
                }
            }
        }

        let lyrics_settings = &job.settings.lyrics;
        if let Some(lyrics) = lyrics {
            let stem = job.paths.final_path.with_extension("");
            if lyrics_settings.save_synced_file && lyrics_settings.synced {
                if let Some(ref synced) = lyrics.synced {
                    tokio::fs::create_dir_all(&job.paths.folder).await?;
                    tokio::fs::write(stem.with_extension("lrc"), synced).await?;
                }
            }
            if lyrics_settings.save_unsynced_file && lyrics_settings.unsynced {
                if let Some(ref unsynced) = lyrics.unsynced {
                    tokio::fs::create_dir_all(&job.paths.folder).await?;
                    tokio::fs::write(stem.with_extension("txt"), unsynced).await?;
                }
            }
        }

        Ok(())
    }
}
