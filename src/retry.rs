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


//! Exponential-backoff retry primitive
//!
//! The schedule is `min(initial * multiplier^attempt, max)`; with the
//! defaults that works out to 1s, 2s, 4s, 8s, 16s, 30s. Rate-limit errors
//! always sleep the full `max_backoff` regardless of the attempt number.
//! Sleeps are cancellable; an in-flight attempt is never aborted mid-call.

use crate::error::{Result, WavesinkError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff configuration for [`retry_with_backoff`]
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
    /// Growth factor between attempts
    pub multiplier: f64,
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Apply ±25% uniform jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: 5,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Same schedule with ±25% jitter, clamped to `[initial, max]`
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay before retrying after the given zero-based attempt failed
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = exp.min(self.max_backoff.as_secs_f64());
        let secs = if self.jitter {
            let factor = rand::thread_rng().gen_range(0.75..=1.25);
            (capped * factor).clamp(
                self.initial_backoff.as_secs_f64(),
                self.max_backoff.as_secs_f64(),
            )
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}

/// Sleep that aborts early when the token fires
pub async fn cancellable_sleep(token: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = token.cancelled() => Err(WavesinkError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run `op` until it succeeds, retries are exhausted, or a non-retryable
/// error surfaces.
///
/// `op` receives the zero-based attempt number. A non-retryable error exits
/// immediately; a rate-limit error forces the sleep to `max_backoff`.
pub async fn retry_with_backoff<T, F, Fut>(
    token: &CancellationToken,
    config: &RetryConfig,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        if token.is_cancelled() {
            return Err(WavesinkError::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                if attempt >= config.max_retries {
                    return Err(err);
                }
                let delay = if err.is_rate_limit() {
                    config.max_backoff
                } else {
                    config.backoff_for_attempt(attempt)
                };
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    category = err.category().as_str(),
                    error = %err,
                    "retrying after backoff"
                );
                cancellable_sleep(token, delay).await?;
                attempt += 1;
            }
        }
    }
}
