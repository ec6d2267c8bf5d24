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


//! Path planning and sanitization
//!
//! Every folder name and filename component is sanitized independently:
//! the Windows-reserved set `<>:"/\|?*` and all control characters map to
//! `_`, leading/trailing whitespace and dots are trimmed, and an empty
//! result is rejected. Template- or user-derived paths are then joined
//! onto the output directory with a contain-within check; absolute paths
//! and `..` segments never make it through.

use crate::api::models::{Quality, TrackMetadata};
use crate::config::DownloadSettings;
use crate::error::{Result, WavesinkError};
use crate::file::template::{render, TemplateContext};
use std::path::{Component, Path, PathBuf};

/// How the track entered the queue; decides which templates apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackPlacement {
    Single,
    AlbumTrack,
    PlaylistTrack,
}

/// Where one track's files land
#[derive(Debug, Clone)]
pub struct TrackPaths {
    /// Final audio file location
    pub final_path: PathBuf,
    /// In-flight `.part` sibling
    pub part_path: PathBuf,
    /// Directory that receives the optional album cover file
    pub folder: PathBuf,
}

/// Replace every filesystem-hostile character in one path segment
pub fn sanitize_segment(segment: &str) -> Result<String> {
    const INVALID: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

    let mapped: String = segment
        .chars()
        .map(|c| {
            if INVALID.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = mapped.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        return Err(WavesinkError::validation(format!(
            "path segment empty after sanitization: {segment:?}"
        )));
    }
    Ok(trimmed.to_string())
}

/// Join sanitized segments onto `base` and prove the result stays inside
/// it. Rejects absolute segments and `..` traversal outright.
pub fn join_contained(base: &Path, segments: &[String]) -> Result<PathBuf> {
    let mut path = base.to_path_buf();
    for segment in segments {
        let candidate = Path::new(segment);
        if candidate.is_absolute() {
            return Err(WavesinkError::validation(format!(
                "absolute path segment: {segment}"
            )));
        }
        for component in candidate.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::ParentDir => {
                    return Err(WavesinkError::validation(format!(
                        "path traversal in segment: {segment}"
                    )));
                }
                Component::CurDir => {}
                _ => {
                    return Err(WavesinkError::validation(format!(
                        "invalid path segment: {segment}"
                    )));
                }
            }
        }
    }

    if !path.starts_with(base) {
        return Err(WavesinkError::validation(format!(
            "path escapes output directory: {}",
            path.display()
        )));
    }
    Ok(path)
}

/// Validate a user-supplied relative path (for example a custom download
/// subfolder) against the output directory
pub fn validate_user_path(base: &Path, user_path: &str) -> Result<PathBuf> {
    if Path::new(user_path).is_absolute() {
        return Err(WavesinkError::validation("absolute paths are not allowed"));
    }
    join_contained(base, &[user_path.to_string()])
}

/// Compute final/partial locations for one track per the configured
/// folder structure and filename templates
pub fn plan_track_paths(
    settings: &DownloadSettings,
    meta: &TrackMetadata,
    placement: TrackPlacement,
    quality: Quality,
) -> Result<TrackPaths> {
    let ctx = TemplateContext::from_metadata(meta);
    let mut folders: Vec<String> = Vec::new();

    match placement {
        TrackPlacement::PlaylistTrack => {
            if settings.create_playlist_folder {
                folders.push(sanitize_segment(&render(
                    &settings.playlist_folder_template,
                    &ctx,
                ))?);
            }
        }
        TrackPlacement::AlbumTrack => {
            if settings.create_artist_folder {
                folders.push(sanitize_segment(&render(
                    &settings.artist_folder_template,
                    &ctx,
                ))?);
            }
            if settings.create_album_folder {
                folders.push(sanitize_segment(&render(
                    &settings.album_folder_template,
                    &ctx,
                ))?);
            }
            if settings.create_cd_folder && meta.track.disc_number.unwrap_or(1) > 1 {
                folders.push(sanitize_segment(&render(
                    &settings.cd_folder_template,
                    &ctx,
                ))?);
            }
        }
        TrackPlacement::Single => {
            if settings.create_artist_folder {
                folders.push(sanitize_segment(&render(
                    &settings.artist_folder_template,
                    &ctx,
                ))?);
            }
        }
    }

    let filename_template = match placement {
        TrackPlacement::Single => &settings.single_track_template,
        TrackPlacement::AlbumTrack => &settings.album_track_template,
        TrackPlacement::PlaylistTrack => &settings.playlist_track_template,
    };
    let stem = sanitize_segment(&render(filename_template, &ctx))?;
    let filename = format!("{stem}.{}", quality.extension());

    let folder = join_contained(&settings.output_dir, &folders)?;
    let final_path = folder.join(&filename);
    let part_path = part_path_for(&final_path);

    Ok(TrackPaths {
        final_path,
        part_path,
        folder,
    })
}

/// The `.part` sibling of a final path
pub fn part_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".part");
    final_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Track;

    fn meta(artist: &str, title: &str) -> TrackMetadata {
        TrackMetadata::from_track(Track {
            id: "1".into(),
            title: title.into(),
            artist: artist.into(),
            album: "Tidelines".into(),
            album_artist: None,
            track_number: Some(3),
            disc_number: Some(1),
            isrc: None,
            duration_seconds: None,
            cover_url: None,
            release_year: None,
        })
    }

    #[test]
    fn reserved_characters_become_underscores() {
        let rendered = render(
            "{artist} - {title}",
            &TemplateContext::from_metadata(&meta("AC/DC", "Back\\In Black ?")),
        );
        assert_eq!(
            sanitize_segment(&rendered).unwrap(),
            "AC_DC - Back_In Black _"
        );
    }

    #[test]
    fn trims_whitespace_and_dots() {
        assert_eq!(sanitize_segment("  name...  ").unwrap(), "name");
        assert_eq!(sanitize_segment(". hidden .").unwrap(), "hidden");
        assert!(sanitize_segment("  ...  ").is_err());
        assert!(sanitize_segment("").is_err());
    }

    #[test]
    fn control_characters_are_mapped() {
        assert_eq!(sanitize_segment("a\u{0000}b\u{001f}c").unwrap(), "a_b_c");
    }

    #[test]
    fn containment_rejects_traversal_and_absolute() {
        let base = Path::new("/music");
        assert!(join_contained(base, &["artist".into(), "album".into()]).is_ok());
        assert!(join_contained(base, &["..".into()]).is_err());
        assert!(join_contained(base, &["a/../..".into()]).is_err());
        assert!(join_contained(base, &["/etc".into()]).is_err());
        assert!(validate_user_path(base, "../outside").is_err());
        assert!(validate_user_path(base, "inside/sub").is_ok());
    }

    #[test]
    fn album_track_layout() {
        let settings = DownloadSettings {
            output_dir: PathBuf::from("/music"),
            ..DownloadSettings::default()
        };
        let mut meta = meta("Mira Voss", "Glass Harbor");
        meta.track.track_number = Some(3);

        let paths = plan_track_paths(
            &settings,
            &meta,
            TrackPlacement::AlbumTrack,
            Quality::Mp3_320,
        )
        .unwrap();

        assert_eq!(
            paths.final_path,
            PathBuf::from("/music/Mira Voss/Tidelines/03 - Glass Harbor.mp3")
        );
        assert_eq!(
            paths.part_path,
            PathBuf::from("/music/Mira Voss/Tidelines/03 - Glass Harbor.mp3.part")
        );
        assert_eq!(paths.folder, PathBuf::from("/music/Mira Voss/Tidelines"));
    }

    #[test]
    fn playlist_track_layout() {
        let settings = DownloadSettings {
            output_dir: PathBuf::from("/music"),
            ..DownloadSettings::default()
        };
        let mut track = meta("Mira Voss", "Glass Harbor");
        track.playlist = Some("Morning Mix".into());
        track.playlist_position = Some(12);

        let paths = plan_track_paths(
            &settings,
            &track,
            TrackPlacement::PlaylistTrack,
            Quality::Flac,
        )
        .unwrap();

        assert_eq!(
            paths.final_path,
            PathBuf::from("/music/Morning Mix/12 - Mira Voss - Glass Harbor.flac")
        );
    }

    #[test]
    fn cd_folder_only_for_later_discs() {
        let settings = DownloadSettings {
            output_dir: PathBuf::from("/music"),
            create_cd_folder: true,
            ..DownloadSettings::default()
        };

        let mut disc1 = meta("Mira Voss", "Glass Harbor");
        disc1.track.disc_number = Some(1);
        let paths = plan_track_paths(&settings, &disc1, TrackPlacement::AlbumTrack, Quality::Mp3_320)
            .unwrap();
        assert!(!paths.final_path.to_string_lossy().contains("CD 1"));

        let mut disc2 = meta("Mira Voss", "Glass Harbor");
        disc2.track.disc_number = Some(2);
        let paths = plan_track_paths(&settings, &disc2, TrackPlacement::AlbumTrack, Quality::Mp3_320)
            .unwrap();
        assert!(paths.final_path.to_string_lossy().contains("CD 2"));
    }

    #[test]
    fn template_yielding_empty_segment_is_rejected() {
        let settings = DownloadSettings {
            output_dir: PathBuf::from("/music"),
            single_track_template: "{playlist}".into(),
            create_artist_folder: false,
            ..DownloadSettings::default()
        };
        let err = plan_track_paths(
            &settings,
            &meta("Mira Voss", "Glass Harbor"),
            TrackPlacement::Single,
            Quality::Mp3_320,
        );
        assert!(err.is_err());
    }
}
