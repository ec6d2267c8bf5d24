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


//! Resumable HTTP range download
//!
//! The primitive streams a URL into a `.part` file, resuming from a prior
//! byte offset when the on-disk `.part` matches it:
//!
//! 1. If the `.part` exists and its size equals the recorded
//!    `bytes_downloaded`, open it for append and set the start offset;
//!    otherwise truncate and start at 0.
//! 2. Issue `GET` with `Range: bytes=<start>-` when resuming; accept
//!    `206 Partial Content` or a full `200 OK` restart.
//! 3. Stream through a 256 KiB buffered writer, reporting every chunk to
//!    the progress callback.
//! 4. On any I/O error: flush, keep the `.part`, surface a network error.
//! 5. On EOF: flush and verify completeness against the known total.
//!
//! Promotion of the finished `.part` to its final name (with a
//! copy+delete fallback across filesystem boundaries) is a separate step
//! so the caller can decrypt and tag in between.

use crate::error::{error_from_status, Result, WavesinkError};
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

/// Write buffer size for the `.part` file
const STREAM_BUF_SZ: usize = 256 * 1024;

/// Everything the primitive needs to fetch one stream
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub part_path: PathBuf,
    /// Byte offset recorded by a previous attempt; 0 for a fresh download
    pub bytes_downloaded: u64,
    /// Total size recorded by a previous attempt; 0 when unknown
    pub total_bytes: u64,
    /// Extra request headers (session cookies ride the client jar)
    pub headers: Vec<(String, String)>,
    /// Bytes per second cap; 0 disables throttling
    pub bandwidth_limit: u64,
}

/// Byte counts after a successful transfer
#[derive(Debug, Clone, Copy)]
pub struct DownloadOutcome {
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
}

/// What a HEAD probe reported about a URL
#[derive(Debug, Clone, Copy)]
pub struct ResumeSupport {
    pub accept_ranges: bool,
    pub content_length: Option<u64>,
}

/// HEAD the URL and report whether the server advertises byte ranges
pub async fn supports_resume(client: &Client, url: &str) -> Result<ResumeSupport> {
    let response = client.head(url).send().await?;
    if !response.status().is_success() {
        return Err(error_from_status(response.status().as_u16(), url));
    }

    let accept_ranges = response
        .headers()
        .get("accept-ranges")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);

    Ok(ResumeSupport {
        accept_ranges,
        content_length: response.content_length(),
    })
}

/// Stream `request.url` into `request.part_path`, resuming when possible.
///
/// `progress` receives `(bytes_downloaded, total_bytes)` after every
/// chunk. The `.part` file is preserved on every error path so the next
/// attempt can resume.
pub async fn download_to_part<F>(
    client: &Client,
    request: &DownloadRequest,
    token: &CancellationToken,
    progress: &mut F,
) -> Result<DownloadOutcome>
where
    F: FnMut(u64, u64),
{
    let mut start = resume_offset(&request.part_path, request.bytes_downloaded).await;

    let mut http = client.get(&request.url);
    for (name, value) in &request.headers {
        http = http.header(name, value);
    }
    if start > 0 {
        http = http.header("Range", format!("bytes={start}-"));
    }

    let response = http.send().await.map_err(|e| WavesinkError::Network {
        message: format!("request failed: {e}"),
        status_code: e.status().map(|s| s.as_u16()),
    })?;

    let mut total = request.total_bytes;
    match response.status() {
        StatusCode::OK => {
            // Full body: either a fresh download or the server ignored the
            // range header, in which case the partial data is stale.
            if start > 0 {
                tracing::debug!(url = %request.url, "server ignored range, restarting");
                start = 0;
            }
            if let Some(len) = response.content_length() {
                total = len;
            }
        }
        StatusCode::PARTIAL_CONTENT => {
            let advertised = response
                .headers()
                .get("content-range")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total);
            match advertised {
                Some(t) if total > 0 && t != total => {
                    return Err(WavesinkError::network(
                        format!("content length changed: expected {total}, got {t}"),
                        Some(206),
                    ));
                }
                Some(t) => total = t,
                None => {
                    return Err(WavesinkError::network(
                        "missing Content-Range on partial response",
                        Some(206),
                    ));
                }
            }
        }
        StatusCode::RANGE_NOT_SATISFIABLE => {
            // The part already covers the whole file
            if total > 0 && start >= total {
                progress(start, total);
                return Ok(DownloadOutcome {
                    bytes_downloaded: start,
                    total_bytes: total,
                });
            }
            return Err(WavesinkError::network(
                "range not satisfiable, remote file changed",
                Some(416),
            ));
        }
        status => return Err(error_from_status(status.as_u16(), &request.url)),
    }

    let file = if start > 0 {
        OpenOptions::new()
            .append(true)
            .open(&request.part_path)
            .await?
    } else {
        if let Some(parent) = request.part_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&request.part_path)
            .await?
    };
    let mut writer = BufWriter::with_capacity(STREAM_BUF_SZ, file);

    let mut written = start;
    let transfer_start = Instant::now();
    let mut transferred_this_run: u64 = 0;
    let mut stream = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            _ = token.cancelled() => {
                writer.flush().await?;
                return Err(WavesinkError::Cancelled);
            }
            chunk = stream.next() => chunk,
        };

        let Some(chunk) = chunk else { break };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                // Keep what we have; the next attempt resumes from here
                writer.flush().await?;
                return Err(WavesinkError::network(
                    format!("stream interrupted: {err}"),
                    None,
                ));
            }
        };

        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
        transferred_this_run += chunk.len() as u64;
        progress(written, total);

        if request.bandwidth_limit > 0 {
            throttle(
                transferred_this_run,
                request.bandwidth_limit,
                transfer_start,
            )
            .await;
        }
    }

    writer.flush().await?;

    if total > 0 && written < total {
        return Err(WavesinkError::DownloadIncomplete {
            received: written,
            expected: total,
        });
    }

    Ok(DownloadOutcome {
        bytes_downloaded: written,
        total_bytes: total,
    })
}

/// Move the finished `.part` into place; copy+delete when rename crosses
/// a filesystem boundary
pub async fn promote_part_file(part_path: &Path, final_path: &Path) -> Result<()> {
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(part_path, final_path).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(part_path, final_path).await?;
            tokio::fs::remove_file(part_path).await?;
            Ok(())
        }
    }
}

/// Decide where the transfer starts: trust the `.part` only when its size
/// matches the recorded offset exactly
async fn resume_offset(part_path: &Path, recorded: u64) -> u64 {
    if recorded == 0 {
        return 0;
    }
    match tokio::fs::metadata(part_path).await {
        Ok(meta) if meta.len() == recorded => recorded,
        Ok(meta) => {
            tracing::debug!(
                part = %part_path.display(),
                on_disk = meta.len(),
                recorded,
                "part size mismatch, restarting"
            );
            0
        }
        Err(_) => 0,
    }
}

/// Parse the total out of `Content-Range: bytes 100-999/1000`
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.split('/').nth(1)?.trim().parse().ok()
}

/// Crude pacing: sleep whenever we are ahead of the configured rate
async fn throttle(transferred: u64, limit: u64, started: Instant) {
    let expected = Duration::from_secs_f64(transferred as f64 / limit as f64);
    let elapsed = started.elapsed();
    if expected > elapsed {
        tokio::time::sleep(expected - elapsed).await;
    }
}
