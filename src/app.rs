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


//! Application handle
//!
//! Owns the root cancellation token every long-lived task hangs off.
//! Only an explicit [`App::shutdown`] is a legitimate cancellation; the
//! scheduler watches the token and screams if it fires any other way.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Root lifetime of the core. Cloneable; all clones share one token.
#[derive(Debug)]
pub struct App {
    token: CancellationToken,
    intentional_shutdown: AtomicBool,
}

impl App {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            intentional_shutdown: AtomicBool::new(false),
        }
    }

    /// The application token; children derive job tokens from it
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Mark the shutdown as intended and cancel everything
    pub fn shutdown(&self) {
        self.intentional_shutdown.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether a cancellation of the token was requested through
    /// [`shutdown`](Self::shutdown)
    pub fn is_intentional_shutdown(&self) -> bool {
        self.intentional_shutdown.load(Ordering::SeqCst)
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_is_flagged_intentional() {
        let app = App::new();
        assert!(!app.is_shutting_down());
        assert!(!app.is_intentional_shutdown());

        app.shutdown();
        assert!(app.is_shutting_down());
        assert!(app.is_intentional_shutdown());
    }

    #[test]
    fn external_cancel_is_not_intentional() {
        let app = App::new();
        app.token().cancel();
        assert!(app.is_shutting_down());
        assert!(!app.is_intentional_shutdown());
    }
}
