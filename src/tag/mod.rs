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


//! Audio tag writing
//!
//! ID3v2.4 frames for MP3, Vorbis comments plus picture blocks for FLAC.
//! The functions here are synchronous; workers call them through
//! `spawn_blocking`.

use crate::api::models::{Quality, TrackMetadata};
use crate::error::{Result, WavesinkError};
use std::path::Path;

/// Everything that gets embedded into one audio file
#[derive(Debug, Clone, Copy)]
pub struct TagRequest<'a> {
    pub meta: &'a TrackMetadata,
    /// JPEG bytes for the front cover
    pub artwork: Option<&'a [u8]>,
    /// Plain-text lyrics to embed
    pub lyrics: Option<&'a str>,
    /// ISO language hint for the lyrics frame
    pub lyrics_language: &'a str,
}

/// Write tags onto a finished (decrypted) audio file in place
pub fn write_tags(path: &Path, quality: Quality, request: &TagRequest<'_>) -> Result<()> {
    match quality {
        Quality::Mp3_320 => write_id3(path, request),
        Quality::Flac => write_flac(path, request),
    }
}

fn write_id3(path: &Path, request: &TagRequest<'_>) -> Result<()> {
    use id3::frame::{Lyrics, Picture, PictureType};
    use id3::{Frame, Tag, TagLike, Version};

    let track = &request.meta.track;
    let mut tag = Tag::new();

    tag.set_title(&track.title);
    tag.set_artist(&track.artist);
    tag.set_album(&track.album);
    if let Some(ref album_artist) = track.album_artist {
        tag.set_album_artist(album_artist);
    }
    if let Some(number) = track.track_number {
        tag.set_track(number);
    }
    if let Some(disc) = track.disc_number {
        tag.set_disc(disc);
    }
    if let Some(year) = track.release_year {
        tag.set_year(year as i32);
    }
    if let Some(ref isrc) = track.isrc {
        tag.add_frame(Frame::text("TSRC", isrc));
    }

    if let Some(artwork) = request.artwork {
        tag.add_frame(Picture {
            mime_type: "image/jpeg".to_string(),
            picture_type: PictureType::CoverFront,
            description: String::new(),
            data: artwork.to_vec(),
        });
    }

    if let Some(lyrics) = request.lyrics {
        tag.add_frame(Lyrics {
            lang: lyrics_lang(request.lyrics_language),
            description: String::new(),
            text: lyrics.to_string(),
        });
    }

    tag.write_to_path(path, Version::Id3v24)
        .map_err(|e| WavesinkError::filesystem(format!("id3 write {}: {e}", path.display())))
}

fn write_flac(path: &Path, request: &TagRequest<'_>) -> Result<()> {
    use metaflac::block::PictureType;
    use metaflac::Tag;

    let track = &request.meta.track;
    let mut tag = Tag::read_from_path(path)
        .map_err(|e| WavesinkError::filesystem(format!("flac open {}: {e}", path.display())))?;

    tag.set_vorbis("TITLE", vec![track.title.clone()]);
    tag.set_vorbis("ARTIST", vec![track.artist.clone()]);
    tag.set_vorbis("ALBUM", vec![track.album.clone()]);
    if let Some(ref album_artist) = track.album_artist {
        tag.set_vorbis("ALBUMARTIST", vec![album_artist.clone()]);
    }
    if let Some(number) = track.track_number {
        tag.set_vorbis("TRACKNUMBER", vec![number.to_string()]);
    }
    if let Some(disc) = track.disc_number {
        tag.set_vorbis("DISCNUMBER", vec![disc.to_string()]);
    }
    if let Some(year) = track.release_year {
        tag.set_vorbis("DATE", vec![year.to_string()]);
    }
    if let Some(ref isrc) = track.isrc {
        tag.set_vorbis("ISRC", vec![isrc.clone()]);
    }
    if let Some(lyrics) = request.lyrics {
        tag.set_vorbis("LYRICS", vec![lyrics.to_string()]);
    }

    if let Some(artwork) = request.artwork {
        tag.add_picture("image/jpeg", PictureType::CoverFront, artwork.to_vec());
    }

    tag.save()
        .map_err(|e| WavesinkError::filesystem(format!("flac write {}: {e}", path.display())))
}

/// ID3 wants a three-letter language; fall back to "eng" for anything
/// else the config hands us
fn lyrics_lang(configured: &str) -> String {
    if configured.len() == 3 && configured.chars().all(|c| c.is_ascii_alphabetic()) {
        configured.to_ascii_lowercase()
    } else {
        "eng".to_string()
    }
}
