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


//! Wavesink core: the download orchestration engine behind the desktop
//! client. Persistent queue, FIFO scheduler, resumable decrypting
//! downloads, and a callback facade for the UI shell.

pub mod api;
pub mod app;
pub mod config;
pub mod crypto;
pub mod download;
pub mod error;
pub mod facade;
pub mod file;
pub mod logging;
pub mod net;
pub mod recovery;
pub mod retry;
pub mod store;
pub mod tag;

// Re-export the types most callers touch
pub use app::App;
pub use download::{DownloadManager, Downloader, Notifier, NullNotifier};
pub use error::{ErrorCategory, Result, WavesinkError};
pub use facade::WavesinkHost;
pub use store::{ItemStatus, ItemType, QueueItem, Store};
