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


//! Error types for the Wavesink core
//!
//! A single sum type covers every fallible operation in the crate. Each
//! variant maps to one of the eight error categories the recovery layer
//! cares about (network, auth, rate_limit, not_found, decryption,
//! filesystem, validation, unknown), and the categorization drives the
//! retry decision:
//!
//! | Category                          | Retryable                 |
//! |-----------------------------------|---------------------------|
//! | network, filesystem, rate_limit   | yes                       |
//! | auth                              | yes, after token refresh  |
//! | decryption, validation, not_found | no                        |

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, WavesinkError>;

/// Coarse error category used for retry decisions and structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Auth,
    RateLimit,
    NotFound,
    Decryption,
    Filesystem,
    Validation,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Decryption => "decryption",
            ErrorCategory::Filesystem => "filesystem",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

/// Main error type for the Wavesink core
#[derive(Error, Debug)]
pub enum WavesinkError {
    // ===== Network =====

    /// Connectivity or transfer failure talking to the service
    #[error("network error: {message}")]
    Network {
        message: String,
        /// HTTP status code if the server answered at all
        status_code: Option<u16>,
    },

    /// The download stream ended before the advertised content length
    #[error("download incomplete: {received}/{expected} bytes")]
    DownloadIncomplete { received: u64, expected: u64 },

    // ===== Auth =====

    /// The session credential (ARL) was rejected or has expired
    #[error("authentication failed: {message}")]
    Auth {
        message: String,
        status_code: Option<u16>,
    },

    // ===== Rate limiting =====

    /// The service asked us to back off (HTTP 429)
    #[error("rate limited by the service")]
    RateLimited {
        /// Seconds to wait if the server said so
        retry_after_seconds: Option<u64>,
    },

    // ===== Lookup =====

    /// Track, album, playlist, or requested quality does not exist
    #[error("not found: {0}")]
    NotFound(String),

    // ===== Decryption =====

    /// Content decryption produced garbage or the key was unusable
    #[error("decryption failed: {0}")]
    Decryption(String),

    // ===== Filesystem =====

    /// Local file operation failed (often transient: AV locks, flaky mounts)
    #[error("filesystem error: {message}")]
    Filesystem { message: String },

    // ===== Validation =====

    /// Bad input: malformed template, escaping path, out-of-range setting
    #[error("validation failed: {0}")]
    Validation(String),

    /// Admission refused because the id is already live in the queue
    #[error("already in queue: {0}")]
    AlreadyQueued(String),

    // ===== Store =====

    /// Database driver error from sqlx
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration could not be applied
    #[error("migration failed: {0}")]
    Migration(String),

    // ===== General =====

    /// Operation cancelled via its cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Operation is not valid for the current state of the row or app
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Internal error that should not normally occur
    #[error("internal error: {0}")]
    Internal(String),

    // ===== External library conversions =====

    /// HTTP client error from reqwest
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Standard I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl WavesinkError {
    /// Create a network error with an optional HTTP status
    pub fn network<S: Into<String>>(message: S, status_code: Option<u16>) -> Self {
        WavesinkError::Network {
            message: message.into(),
            status_code,
        }
    }

    /// Create an auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        WavesinkError::Auth {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a rate-limit error
    pub fn rate_limited(retry_after_seconds: Option<u64>) -> Self {
        WavesinkError::RateLimited {
            retry_after_seconds,
        }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        WavesinkError::NotFound(resource.into())
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        WavesinkError::Validation(message.into())
    }

    /// Create a filesystem error
    pub fn filesystem<S: Into<String>>(message: S) -> Self {
        WavesinkError::Filesystem {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        WavesinkError::Internal(message.into())
    }

    /// Classify this error into its category
    pub fn category(&self) -> ErrorCategory {
        match self {
            WavesinkError::Network { .. } | WavesinkError::DownloadIncomplete { .. } => {
                ErrorCategory::Network
            }
            WavesinkError::Http(_) => ErrorCategory::Network,
            WavesinkError::Auth { .. } => ErrorCategory::Auth,
            WavesinkError::RateLimited { .. } => ErrorCategory::RateLimit,
            WavesinkError::NotFound(_) => ErrorCategory::NotFound,
            WavesinkError::Decryption(_) => ErrorCategory::Decryption,
            WavesinkError::Filesystem { .. } | WavesinkError::Io(_) => ErrorCategory::Filesystem,
            WavesinkError::Validation(_)
            | WavesinkError::AlreadyQueued(_)
            | WavesinkError::Json(_) => ErrorCategory::Validation,
            WavesinkError::Database(_)
            | WavesinkError::Migration(_)
            | WavesinkError::Cancelled
            | WavesinkError::InvalidState(_)
            | WavesinkError::Internal(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether a retry might succeed.
    ///
    /// Auth errors count as retryable because the recovery layer refreshes
    /// the session token before the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network
                | ErrorCategory::Filesystem
                | ErrorCategory::RateLimit
                | ErrorCategory::Auth
        )
    }

    /// Whether the error indicates the session credential must be refreshed
    pub fn is_auth(&self) -> bool {
        self.category() == ErrorCategory::Auth
    }

    /// Whether the service is throttling us
    pub fn is_rate_limit(&self) -> bool {
        self.category() == ErrorCategory::RateLimit
    }

    /// Whether the error is a connectivity/transfer failure
    pub fn is_network(&self) -> bool {
        self.category() == ErrorCategory::Network
    }

    /// HTTP status code attached to the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            WavesinkError::Network { status_code, .. } => *status_code,
            WavesinkError::Auth { status_code, .. } => *status_code,
            WavesinkError::RateLimited { .. } => Some(429),
            WavesinkError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Seconds the server asked us to wait, for rate-limit errors
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            WavesinkError::RateLimited {
                retry_after_seconds,
            } => *retry_after_seconds,
            _ => None,
        }
    }
}

/// Map an HTTP status into the matching error variant
pub fn error_from_status(status: u16, context: &str) -> WavesinkError {
    match status {
        401 | 403 => WavesinkError::Auth {
            message: context.to_string(),
            status_code: Some(status),
        },
        404 => WavesinkError::NotFound(context.to_string()),
        429 => WavesinkError::RateLimited {
            retry_after_seconds: None,
        },
        _ => WavesinkError::Network {
            message: context.to_string(),
            status_code: Some(status),
        },
    }
}
