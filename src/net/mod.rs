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


//! Shared HTTP plumbing: tuned client pool and the resumable
//! range-download primitive.

pub mod pool;
pub mod resume;

pub use pool::HttpClients;
pub use resume::{
    download_to_part, promote_part_file, supports_resume, DownloadOutcome, DownloadRequest,
    ResumeSupport,
};
