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


//! UI notification channel
//!
//! Workers publish three kinds of events through the [`Notifier`]
//! capability: byte-level progress, status transitions, and coarse
//! "the queue changed, refresh your page" pokes. The facade adapts this
//! to whatever callback transport the shell registered. Implementations
//! must not block; they are invoked from worker tasks.

use crate::store::models::ItemStatus;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Byte-level progress for one in-flight track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub id: String,
    pub title: String,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    /// 0..100
    pub progress: f64,
    /// Smoothed bytes per second
    pub speed_bps: f64,
}

impl ProgressUpdate {
    pub fn percent(bytes_downloaded: u64, total_bytes: u64) -> f64 {
        if total_bytes == 0 {
            0.0
        } else {
            (bytes_downloaded as f64 / total_bytes as f64) * 100.0
        }
    }
}

/// A row moved to a new status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub id: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Event sink towards the UI
pub trait Notifier: Send + Sync {
    fn progress(&self, update: &ProgressUpdate);
    fn status(&self, update: &StatusUpdate);
    fn queue_changed(&self);
}

/// Sink that drops everything; used before callbacks are registered and
/// in tests
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn progress(&self, _update: &ProgressUpdate) {}
    fn status(&self, _update: &StatusUpdate) {}
    fn queue_changed(&self) {}
}

/// Sliding-window transfer speed, smoothed over the last few seconds so
/// the UI number does not flap with every TCP burst
#[derive(Debug)]
pub struct SpeedTracker {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(10))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Record the running byte total
    pub fn add_position(&mut self, position: u64) {
        let now = Instant::now();
        self.samples.push_back((now, position));
        while let Some((ts, _)) = self.samples.front() {
            if now.duration_since(*ts) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average bytes per second over the window; 0 until two samples exist
    pub fn average_bps(&self) -> f64 {
        let (first, last) = match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) if self.samples.len() >= 2 => (*first, *last),
            _ => return 0.0,
        };
        let elapsed = last.0.duration_since(first.0).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        last.1.saturating_sub(first.1) as f64 / elapsed
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}
