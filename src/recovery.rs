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


//! Recovery layer: retry with token refresh and rate-limit gating
//!
//! Wraps an operation in the exponential-backoff loop and adds two side
//! effects the plain retry primitive cannot know about:
//!
//! - **auth** errors trigger the injected [`TokenRefresher`] exactly once
//!   per failure, serialized behind a single-flight mutex so concurrent
//!   workers cannot stampede the refresh endpoint;
//! - **rate_limit** errors arm a process-wide `rate_limited_until`
//!   instant. Every subsequent call sleeps the gate off *before* invoking
//!   its operation, so one throttled worker quiets the whole pool.
//!
//! Both live inside the manager value; there is no module-level state.

use crate::api::TokenRefresher;
use crate::error::{Result, WavesinkError};
use crate::retry::{cancellable_sleep, RetryConfig};
use std::future::Future;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Process-wide recovery state shared by all workers
pub struct RecoveryManager {
    refresher: Arc<dyn TokenRefresher>,
    refresh_lock: tokio::sync::Mutex<()>,
    rate_limited_until: Mutex<Option<Instant>>,
    config: RetryConfig,
}

impl RecoveryManager {
    pub fn new(refresher: Arc<dyn TokenRefresher>, config: RetryConfig) -> Self {
        Self {
            refresher,
            refresh_lock: tokio::sync::Mutex::new(()),
            rate_limited_until: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// When the current rate-limit window ends, if one is armed
    pub fn rate_limited_until(&self) -> Option<Instant> {
        *self.rate_limited_until.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `op` under retry, refresh, and rate-limit recovery
    pub async fn execute<T, F, Fut>(
        &self,
        token: &CancellationToken,
        operation: &str,
        op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_hook(token, operation, op, |_, _| {}).await
    }

    /// Same as [`execute`](Self::execute), invoking `on_retry` with the
    /// attempt number and error before each backoff sleep. The scheduler
    /// uses the hook to persist `retry_count` between attempts.
    pub async fn execute_with_hook<T, F, Fut, H>(
        &self,
        token: &CancellationToken,
        operation: &str,
        mut op: F,
        mut on_retry: H,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        H: FnMut(u32, &WavesinkError),
    {
        let mut attempt: u32 = 0;
        loop {
            if token.is_cancelled() {
                return Err(WavesinkError::Cancelled);
            }

            // Someone may have armed the gate while we were backing off
            self.wait_out_rate_limit(token, operation).await?;

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if matches!(err, WavesinkError::Cancelled) => return Err(err),
                Err(err) if !err.is_retryable() => {
                    tracing::warn!(
                        operation,
                        category = err.category().as_str(),
                        error = %err,
                        "non-retryable failure"
                    );
                    return Err(err);
                }
                Err(err) => {
                    if attempt >= self.config.max_retries {
                        tracing::warn!(
                            operation,
                            attempts = attempt + 1,
                            category = err.category().as_str(),
                            error = %err,
                            "retries exhausted"
                        );
                        return Err(err);
                    }

                    on_retry(attempt, &err);

                    if err.is_auth() {
                        self.refresh_session(operation).await?;
                    } else if err.is_rate_limit() {
                        let until = self.arm_rate_limit();
                        tracing::info!(
                            operation,
                            window_secs = self.config.max_backoff.as_secs(),
                            "rate limited, gating all workers"
                        );
                        let remaining = until.saturating_duration_since(Instant::now());
                        cancellable_sleep(token, remaining).await?;
                        tracing::info!(operation, "rate limit window passed");
                    } else {
                        let delay = self.config.backoff_for_attempt(attempt);
                        tracing::debug!(
                            operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying after backoff"
                        );
                        cancellable_sleep(token, delay).await?;
                    }

                    attempt += 1;
                }
            }
        }
    }

    /// Single-flight token refresh. A second caller arriving while a
    /// refresh is in flight waits for it and proceeds without issuing its
    /// own.
    async fn refresh_session(&self, operation: &str) -> Result<()> {
        let was_locked = self.refresh_lock.try_lock().is_err();
        let _guard = self.refresh_lock.lock().await;
        if was_locked {
            // Another worker just refreshed on our behalf
            tracing::info!(operation, "token refresh coalesced");
            return Ok(());
        }

        match self.refresher.refresh().await {
            Ok(()) => {
                tracing::info!(operation, "token refresh succeeded");
                Ok(())
            }
            Err(err) => {
                tracing::error!(operation, error = %err, "token refresh failed");
                Err(err)
            }
        }
    }

    /// Arm (or keep) the rate-limit gate; returns when it ends. Only the
    /// first worker of a storm moves the timestamp, later ones read it.
    fn arm_rate_limit(&self) -> Instant {
        let candidate = Instant::now() + self.config.max_backoff;
        let mut until = self
            .rate_limited_until
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match *until {
            Some(existing) if existing >= Instant::now() => existing,
            _ => {
                *until = Some(candidate);
                candidate
            }
        }
    }

    /// Sleep until any armed rate-limit window has passed
    async fn wait_out_rate_limit(
        &self,
        token: &CancellationToken,
        operation: &str,
    ) -> Result<()> {
        loop {
            let until = self.rate_limited_until();
            let Some(until) = until else { return Ok(()) };
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            tracing::info!(
                operation,
                wait_ms = remaining.as_millis() as u64,
                "waiting out rate limit gate"
            );
            cancellable_sleep(token, remaining).await?;
        }
    }
}
