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


//! Shared test fixtures: a scripted service API, a byte-range-capable
//! media server on a loopback socket, and an event-recording notifier.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use wavesink::api::models::*;
use wavesink::api::{ServiceApi, TokenRefresher};
use wavesink::config::Settings;
use wavesink::download::{Notifier, ProgressUpdate, StatusUpdate};
use wavesink::error::{Result, WavesinkError};

// ============================================================================
// Track builders
// ============================================================================

pub fn track(id: &str, title: &str, artist: &str, album: &str, number: u32) -> Track {
    Track {
        id: id.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
        album: album.to_string(),
        album_artist: Some(artist.to_string()),
        track_number: Some(number),
        disc_number: Some(1),
        isrc: None,
        duration_seconds: Some(180),
        cover_url: None,
        release_year: Some(2024),
    }
}

// ============================================================================
// Scripted service API
// ============================================================================

pub struct MockApi {
    pub tracks: RwLock<HashMap<String, Track>>,
    pub albums: RwLock<HashMap<String, Album>>,
    pub playlists: RwLock<HashMap<String, Playlist>>,
    /// Track ids whose stream resolution fails with not_found
    pub missing_streams: RwLock<HashSet<String>>,
    /// Base URL of the media server, e.g. `http://127.0.0.1:45123`
    pub stream_base: String,
}

impl MockApi {
    pub fn new(stream_base: String) -> Arc<Self> {
        Arc::new(Self {
            tracks: RwLock::new(HashMap::new()),
            albums: RwLock::new(HashMap::new()),
            playlists: RwLock::new(HashMap::new()),
            missing_streams: RwLock::new(HashSet::new()),
            stream_base,
        })
    }

    pub fn add_track(&self, track: Track) {
        self.tracks.write().unwrap().insert(track.id.clone(), track);
    }

    pub fn add_album(&self, album: Album) {
        for track in &album.tracks {
            self.add_track(track.clone());
        }
        self.albums.write().unwrap().insert(album.id.clone(), album);
    }

    pub fn mark_stream_missing(&self, track_id: &str) {
        self.missing_streams
            .write()
            .unwrap()
            .insert(track_id.to_string());
    }
}

#[async_trait]
impl ServiceApi for MockApi {
    async fn search(&self, _query: &str, _kind: SearchKind, _limit: u32) -> Result<SearchPage> {
        Ok(SearchPage {
            data: Vec::new(),
            total: 0,
        })
    }

    async fn track(&self, id: &str) -> Result<Track> {
        self.tracks
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| WavesinkError::not_found(format!("track {id}")))
    }

    async fn album(&self, id: &str) -> Result<Album> {
        self.albums
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| WavesinkError::not_found(format!("album {id}")))
    }

    async fn artist(&self, id: &str) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "id": id }))
    }

    async fn playlist(&self, id: &str) -> Result<Playlist> {
        self.playlists
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| WavesinkError::not_found(format!("playlist {id}")))
    }

    async fn charts(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "tracks": [] }))
    }

    async fn stream_url(&self, track: &Track, quality: Quality) -> Result<String> {
        if self.missing_streams.read().unwrap().contains(&track.id) {
            return Err(WavesinkError::not_found(format!(
                "no {} stream for track {}",
                quality.as_str(),
                track.id
            )));
        }
        Ok(format!("{}/media/{}", self.stream_base, track.id))
    }

    async fn lyrics(&self, _track_id: &str) -> Result<Option<Lyrics>> {
        Ok(None)
    }

    async fn cover_art(&self, _url: &str, _size: u32) -> Result<Vec<u8>> {
        Ok(vec![0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10])
    }
}

/// Refresher that always succeeds; recovery tests live in the unit suite
pub struct OkRefresher;

#[async_trait]
impl TokenRefresher for OkRefresher {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Media server with byte-range support
// ============================================================================

struct ServedFile {
    bytes: Vec<u8>,
    /// Serve only this many bytes of the first response, then drop the
    /// connection mid-body (tests resumption)
    truncate_first: Option<usize>,
}

/// Minimal blocking HTTP server good enough for reqwest: one response
/// per connection, `Connection: close`, `Range: bytes=N-` honoured with
/// 206 + Content-Range.
pub struct MediaServer {
    addr: SocketAddr,
    files: Arc<Mutex<HashMap<String, ServedFile>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    ranges_seen: Arc<Mutex<Vec<(String, u64)>>>,
    concurrent: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,
    response_delay: Arc<Mutex<Duration>>,
    /// Sleep between body chunks; lets tests pause a transfer mid-flight
    chunk_delay: Arc<Mutex<Duration>>,
}

impl MediaServer {
    pub fn start() -> Arc<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("server addr");

        let server = Arc::new(Self {
            addr,
            files: Arc::new(Mutex::new(HashMap::new())),
            hits: Arc::new(Mutex::new(HashMap::new())),
            ranges_seen: Arc::new(Mutex::new(Vec::new())),
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent: Arc::new(AtomicUsize::new(0)),
            response_delay: Arc::new(Mutex::new(Duration::ZERO)),
            chunk_delay: Arc::new(Mutex::new(Duration::ZERO)),
        });

        let accept_server = Arc::clone(&server);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let server = Arc::clone(&accept_server);
                std::thread::spawn(move || server.handle(stream));
            }
        });

        server
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn add_file(&self, track_id: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(
            format!("/media/{track_id}"),
            ServedFile {
                bytes,
                truncate_first: None,
            },
        );
    }

    pub fn add_flaky_file(&self, track_id: &str, bytes: Vec<u8>, truncate_at: usize) {
        self.files.lock().unwrap().insert(
            format!("/media/{track_id}"),
            ServedFile {
                bytes,
                truncate_first: Some(truncate_at),
            },
        );
    }

    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.lock().unwrap() = delay;
    }

    pub fn set_chunk_delay(&self, delay: Duration) {
        *self.chunk_delay.lock().unwrap() = delay;
    }

    pub fn hits_for(&self, track_id: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .get(&format!("/media/{track_id}"))
            .copied()
            .unwrap_or(0)
    }

    /// `(path, start_offset)` for every Range request seen
    pub fn ranges_seen(&self) -> Vec<(String, u64)> {
        self.ranges_seen.lock().unwrap().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn handle(&self, mut stream: TcpStream) {
        let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);

        let result = self.respond(&mut stream);
        if result.is_err() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
    }

    fn respond(&self, stream: &mut TcpStream) -> std::io::Result<()> {
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            request.extend_from_slice(&buf[..n]);
            if request.len() > 64 * 1024 {
                return Ok(());
            }
        }
        let request = String::from_utf8_lossy(&request);

        let first_line = request.lines().next().unwrap_or("");
        let method = first_line.split_whitespace().next().unwrap_or("GET").to_string();
        let path = first_line
            .split_whitespace()
            .nth(1)
            .unwrap_or("/")
            .to_string();

        let range_start: Option<u64> = request
            .lines()
            .find(|line| line.to_lowercase().starts_with("range:"))
            .and_then(|line| line.split('=').nth(1))
            .and_then(|spec| spec.trim().trim_end_matches('-').parse().ok());

        let delay = *self.response_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if method == "HEAD" {
            let files = self.files.lock().unwrap();
            let response = match files.get(&path) {
                Some(file) => format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                    file.bytes.len()
                ),
                None => {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_string()
                }
            };
            stream.write_all(response.as_bytes())?;
            return Ok(());
        }

        let (body, truncate, total) = {
            let mut files = self.files.lock().unwrap();
            let Some(file) = files.get_mut(&path) else {
                stream.write_all(
                    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                )?;
                return Ok(());
            };
            let truncate = file.truncate_first.take();
            (file.bytes.clone(), truncate, file.bytes.len() as u64)
        };

        *self.hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;
        if let Some(start) = range_start {
            self.ranges_seen.lock().unwrap().push((path, start));
        }

        let start = range_start.unwrap_or(0).min(total);
        let slice = &body[start as usize..];

        let header = if range_start.is_some() {
            format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                slice.len(),
                start,
                total.saturating_sub(1),
                total
            )
        } else {
            format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                slice.len()
            )
        };
        stream.write_all(header.as_bytes())?;

        let chunk_delay = *self.chunk_delay.lock().unwrap();
        match truncate {
            Some(cut) if cut < slice.len() => {
                stream.write_all(&slice[..cut])?;
                stream.flush()?;
                // Drop mid-body so the client sees a broken stream
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
            _ if chunk_delay.is_zero() => {
                stream.write_all(slice)?;
                stream.flush()?;
            }
            _ => {
                for chunk in slice.chunks(16 * 1024) {
                    stream.write_all(chunk)?;
                    stream.flush()?;
                    std::thread::sleep(chunk_delay);
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Recording notifier
// ============================================================================

#[derive(Debug, Clone)]
pub enum Event {
    Progress(ProgressUpdate),
    Status(StatusUpdate),
    QueueChanged,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statuses(&self) -> Vec<StatusUpdate> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                Event::Status(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn progress(&self, update: &ProgressUpdate) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Progress(update.clone()));
    }

    fn status(&self, update: &StatusUpdate) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Status(update.clone()));
    }

    fn queue_changed(&self) {
        self.events.lock().unwrap().push(Event::QueueChanged);
    }
}

// ============================================================================
// Settings + polling helpers
// ============================================================================

pub fn test_settings(output_dir: &std::path::Path, workers: u32) -> Settings {
    let mut settings = Settings::default();
    settings.download.output_dir = output_dir.to_path_buf();
    settings.download.concurrent_downloads = workers;
    settings.download.quality = "MP3_320".to_string();
    settings.download.embed_artwork = false;
    settings.download.save_album_cover = false;
    settings.network.max_retries = 3;
    settings
}

/// Poll until `predicate` returns true or the deadline passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
