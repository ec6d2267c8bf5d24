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


//! Naming templates
//!
//! Templates reference braced tokens evaluated against per-track
//! metadata: `{artist}`, `{title}`, `{album}`, `{album_artist}`,
//! `{playlist}`, `{track_number}`, `{disc_number}`,
//! `{playlist_position}`. Numeric tokens accept a zero-pad width in the
//! form `{track_number:02d}`. Unknown or missing tokens resolve to the
//! empty string; sanitization happens per segment afterwards, not here.

use crate::api::models::TrackMetadata;
use regex::Regex;
use std::sync::OnceLock;

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)(?::0?(\d+)d)?\}").expect("valid token pattern"))
}

/// Values a template can reference for one track
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub album_artist: String,
    pub playlist: String,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub playlist_position: Option<u32>,
}

impl TemplateContext {
    pub fn from_metadata(meta: &TrackMetadata) -> Self {
        Self {
            artist: meta.track.artist.clone(),
            title: meta.track.title.clone(),
            album: meta.track.album.clone(),
            album_artist: meta
                .track
                .album_artist
                .clone()
                .unwrap_or_else(|| meta.track.artist.clone()),
            playlist: meta.playlist.clone().unwrap_or_default(),
            track_number: meta.track.track_number,
            disc_number: meta.track.disc_number,
            playlist_position: meta.playlist_position,
        }
    }

    fn resolve(&self, token: &str, pad: Option<usize>) -> String {
        let number = |n: Option<u32>| match n {
            Some(n) => match pad {
                Some(width) => format!("{n:0width$}"),
                None => n.to_string(),
            },
            None => String::new(),
        };

        match token {
            "artist" => self.artist.clone(),
            "title" => self.title.clone(),
            "album" => self.album.clone(),
            "album_artist" => self.album_artist.clone(),
            "playlist" => self.playlist.clone(),
            "track_number" => number(self.track_number),
            "disc_number" => number(self.disc_number),
            "playlist_position" => number(self.playlist_position),
            _ => String::new(),
        }
    }
}

/// Evaluate a template against a context. The result is a raw segment
/// string; callers sanitize it before it touches the filesystem.
pub fn render(template: &str, ctx: &TemplateContext) -> String {
    token_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let token = &caps[1];
            let pad = caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok());
            ctx.resolve(token, pad)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext {
            artist: "Mira Voss".into(),
            title: "Glass Harbor".into(),
            album: "Tidelines".into(),
            album_artist: "Mira Voss".into(),
            playlist: "Morning Mix".into(),
            track_number: Some(3),
            disc_number: Some(1),
            playlist_position: Some(12),
        }
    }

    #[test]
    fn plain_tokens() {
        assert_eq!(
            render("{artist} - {title}", &ctx()),
            "Mira Voss - Glass Harbor"
        );
        assert_eq!(render("{album_artist}/{album}", &ctx()), "Mira Voss/Tidelines");
    }

    #[test]
    fn zero_padded_numbers() {
        assert_eq!(render("{track_number:02d} - {title}", &ctx()), "03 - Glass Harbor");
        assert_eq!(render("{playlist_position:03d}", &ctx()), "012");
        assert_eq!(render("{disc_number}", &ctx()), "1");
    }

    #[test]
    fn missing_tokens_become_empty() {
        let mut context = ctx();
        context.track_number = None;
        context.playlist = String::new();
        assert_eq!(render("{track_number} {playlist}x", &context), " x");
        assert_eq!(render("{no_such_token}y", &context), "y");
    }

    #[test]
    fn literal_text_is_preserved() {
        assert_eq!(render("CD {disc_number}", &ctx()), "CD 1");
        assert_eq!(render("no tokens here", &ctx()), "no tokens here");
    }
}
