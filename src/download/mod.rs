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


//! Downloading: the per-track pipeline, the scheduler over it, and the
//! notification channel back to the UI.

pub mod downloader;
pub mod manager;
pub mod notify;

pub use downloader::{Downloader, TrackJob, TrackOutcome};
pub use manager::DownloadManager;
pub use notify::{Notifier, NullNotifier, ProgressUpdate, SpeedTracker, StatusUpdate};
