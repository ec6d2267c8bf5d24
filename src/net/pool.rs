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


//! Shared HTTP client pool
//!
//! Two clients with one connection pool philosophy: the `api` client has
//! an overall request timeout suitable for JSON calls; the `media` client
//! has no total timeout (a FLAC over a slow link legitimately takes
//! minutes) and slightly fewer per-host connections. Both keep
//! connections alive, carry a cookie jar for the session, and honour the
//! configured proxy.

use crate::config::NetworkSettings;
use crate::error::{Result, WavesinkError};
use reqwest::Client;
use std::time::Duration;

/// Idle connections kept per host
const MAX_IDLE_PER_HOST: usize = 20;
/// Idle connections kept per host on the media client
const MEDIA_MAX_IDLE_PER_HOST: usize = 10;
/// How long an idle connection stays pooled
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
/// TCP connect + TLS handshake budget
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// TCP keep-alive probe interval
const KEEPALIVE: Duration = Duration::from_secs(60);

const USER_AGENT: &str = concat!("Wavesink/", env!("CARGO_PKG_VERSION"));

/// The two shared clients the whole core downloads through
#[derive(Debug, Clone)]
pub struct HttpClients {
    /// JSON/API calls: bounded total request time
    pub api: Client,
    /// Media streaming: unbounded body time, patient headers
    pub media: Client,
}

impl HttpClients {
    pub fn build(network: &NetworkSettings) -> Result<Self> {
        let proxy = if network.proxy_url.is_empty() {
            None
        } else {
            Some(
                reqwest::Proxy::all(&network.proxy_url)
                    .map_err(|e| WavesinkError::validation(format!("proxy_url: {e}")))?,
            )
        };

        let mut api = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(KEEPALIVE)
            .timeout(Duration::from_secs(network.timeout));
        if let Some(ref p) = proxy {
            api = api.proxy(p.clone());
        }

        let mut media = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .pool_max_idle_per_host(MEDIA_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(KEEPALIVE);
        if let Some(p) = proxy {
            media = media.proxy(p);
        }

        Ok(Self {
            api: api.build()?,
            media: media.build()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        HttpClients::build(&NetworkSettings::default()).unwrap();
    }

    #[test]
    fn rejects_bad_proxy() {
        let mut network = NetworkSettings::default();
        network.proxy_url = "::: nope".into();
        assert!(HttpClients::build(&network).is_err());
    }
}
