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


//! Structured logging setup
//!
//! Builds the global `tracing` subscriber from the logging section of the
//! settings document: level filter, text or JSON formatting, and file
//! and/or stdout output. File output rotates daily through
//! `tracing-appender`; old files are pruned at startup against the
//! configured backup and age limits.

use crate::config::LoggingSettings;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "wavesink.log";

/// Install the global subscriber.
///
/// Returns the appender guard that must stay alive for the lifetime of
/// the process; dropping it stops the background writer thread. Calling
/// twice is harmless: the second call leaves the first subscriber in
/// place.
pub fn init(settings: &LoggingSettings, default_log_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&settings.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = if settings.file_path.is_empty() {
        default_log_dir.to_path_buf()
    } else {
        PathBuf::from(&settings.file_path)
    };

    let to_file = matches!(settings.output.as_str(), "file" | "both");
    let to_stdout = matches!(settings.output.as_str(), "stdout" | "both") || !to_file;
    let json = settings.format == "json";

    let mut layers: Vec<Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>> = Vec::new();
    let mut guard = None;

    if to_file {
        std::fs::create_dir_all(&log_dir)?;
        prune_old_logs(&log_dir, settings.max_backups, settings.max_age_days);

        let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);
        layers.push(if json {
            layer.json().boxed()
        } else {
            layer.boxed()
        });
    }

    if to_stdout {
        let layer = tracing_subscriber::fmt::layer();
        layers.push(if json {
            layer.json().boxed()
        } else {
            layer.boxed()
        });
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();

    Ok(guard)
}

/// Delete rotated log files beyond the backup count or older than the age
/// limit. Rotation itself is daily; this keeps the directory bounded.
fn prune_old_logs(dir: &Path, max_backups: u32, max_age_days: u32) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    let mut logs: Vec<(PathBuf, SystemTime)> = entries
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with(LOG_FILE_PREFIX)
        })
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((e.path(), modified))
        })
        .collect();

    // Newest first
    logs.sort_by(|a, b| b.1.cmp(&a.1));

    let max_age = Duration::from_secs(u64::from(max_age_days) * 24 * 60 * 60);
    let now = SystemTime::now();

    for (index, (path, modified)) in logs.iter().enumerate() {
        let too_many = max_backups > 0 && index >= max_backups as usize;
        let too_old = max_age_days > 0
            && now
                .duration_since(*modified)
                .map(|age| age > max_age)
                .unwrap_or(false);
        if too_many || too_old {
            if let Err(err) = std::fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %err, "log prune failed");
            }
        }
    }
}
