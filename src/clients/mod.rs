// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outbound HTTP clients for the measurement providers.
//!
//! Clients are thin and stateless: they build URLs, attach credentials,
//! race every call against the caller's cancellation token, and turn
//! non-success responses into [`UpstreamError`] with the provider's own
//! retry delay attached.

pub mod atlas;
pub mod globalping;

pub use atlas::AtlasClient;
pub use globalping::GlobalpingClient;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Header carrying the provider's rate-limit reset, in seconds or epoch.
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Anything above this is read as a unix timestamp rather than a delay.
const EPOCH_THRESHOLD: u64 = 1_000_000_000;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{backend} responded with status {status}")]
    Status {
        backend: &'static str,
        status: u16,
        retry_after: Option<u64>,
        body: Option<Value>,
    },

    #[error("{backend} request failed: {source}")]
    Transport {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{backend} returned an unreadable response: {reason}")]
    BadResponse {
        backend: &'static str,
        reason: String,
    },

    #[error("upstream call cancelled")]
    Cancelled,
}

impl UpstreamError {
    /// Status passed through to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Transport { source, .. } if source.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            Self::Transport { .. } | Self::BadResponse { .. } => StatusCode::BAD_GATEWAY,
            Self::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Status { .. } => "upstream_error",
            Self::Transport { .. } => "upstream_unreachable",
            Self::BadResponse { .. } => "bad_upstream_response",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&Value> {
        match self {
            Self::Status { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Status { backend, .. }
            | Self::Transport { backend, .. }
            | Self::BadResponse { backend, .. } => backend,
            Self::Cancelled => "none",
        }
    }

    pub(crate) fn bad_response(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BadResponse {
            backend,
            reason: reason.into(),
        }
    }
}

/// Build the shared outbound client.
pub fn http_client(timeout: Duration, user_agent: &str) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
}

/// Send `request`, aborting promptly if `cancel` fires.
pub(crate) async fn send(
    backend: &'static str,
    request: RequestBuilder,
    cancel: &CancellationToken,
) -> Result<Response, UpstreamError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(UpstreamError::Cancelled),
        result = request.send() => result.map_err(|source| UpstreamError::Transport { backend, source }),
    }
}

/// Pass success and `304 Not Modified` through; everything else becomes
/// [`UpstreamError::Status`].
pub(crate) async fn check_status(
    backend: &'static str,
    response: Response,
    cancel: &CancellationToken,
) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() || status == reqwest::StatusCode::NOT_MODIFIED {
        return Ok(response);
    }

    let retry_after = retry_after_from(response.headers(), Utc::now());
    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
        bytes = response.bytes() => bytes.ok().and_then(|b| serde_json::from_slice::<Value>(&b).ok()),
    };
    debug!(backend, status = status.as_u16(), ?retry_after, "Upstream error response");
    Err(UpstreamError::Status {
        backend,
        status: status.as_u16(),
        retry_after,
        body,
    })
}

/// Read a JSON body, aborting promptly if `cancel` fires.
pub(crate) async fn read_json<T: DeserializeOwned>(
    backend: &'static str,
    response: Response,
    cancel: &CancellationToken,
) -> Result<T, UpstreamError> {
    let bytes = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
        bytes = response.bytes() => bytes.map_err(|source| UpstreamError::Transport { backend, source })?,
    };
    serde_json::from_slice(&bytes).map_err(|e| UpstreamError::bad_response(backend, e.to_string()))
}

/// Provider retry delay from `retry-after` or the rate-limit reset header,
/// whichever is present.
pub fn retry_after_from(headers: &HeaderMap, now: DateTime<Utc>) -> Option<u64> {
    if let Some(value) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(secs);
        }
        if let Ok(at) = DateTime::parse_from_rfc2822(value) {
            return Some((at.timestamp() - now.timestamp()).max(0) as u64);
        }
    }

    let reset = headers
        .get(RATE_LIMIT_RESET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())?;
    if reset > EPOCH_THRESHOLD {
        Some((reset as i64 - now.timestamp()).max(0) as u64)
    } else {
        Some(reset)
    }
}
