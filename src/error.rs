// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types surfaced at the HTTP boundary.

use crate::clients::UpstreamError;
use crate::validator::ValidationError;
use crate::verification::VerificationFailure;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Gateway error taxonomy.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("rate limit exceeded, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("no API key supplied for {backend}")]
    MissingApiKey { backend: &'static str },

    #[error("human verification failed: {0}")]
    Verification(#[from] VerificationFailure),

    #[error("{message}")]
    Config { code: &'static str, message: String },

    #[error("{message}")]
    Unsupported { code: &'static str, message: String },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("provider returned {received} of 2 measurement handles")]
    PairIncomplete { received: usize },

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<serde_json::Value>,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::MissingApiKey { .. } => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Verification(_) => StatusCode::FORBIDDEN,
            Self::Config { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::Upstream(e) => e.status(),
            Self::PairIncomplete { .. } => StatusCode::BAD_GATEWAY,
            // Client went away; nobody reads this.
            Self::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.code(),
            Self::RateLimited { .. } => "rate_limited",
            Self::MissingApiKey { .. } => "missing_api_key",
            Self::Verification(f) => f.code(),
            Self::Config { code, .. } | Self::Unsupported { code, .. } => *code,
            Self::Upstream(e) => e.code(),
            Self::PairIncomplete { .. } => "pair_incomplete",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            Self::Upstream(e) => e.retry_after(),
            _ => None,
        }
    }

    pub fn unsupported(code: &'static str, message: impl Into<String>) -> Self {
        Self::Unsupported {
            code,
            message: message.into(),
        }
    }

    pub fn config(code: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
        }
    }

    fn body(&self) -> ErrorBody {
        let message = match self {
            Self::Internal(detail) => {
                error!(detail = %detail, "Internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        ErrorBody {
            error: self.code(),
            message,
            params: match self {
                Self::Validation(e) => e.params(),
                _ => None,
            },
            retry_after: self.retry_after(),
            upstream: match self {
                Self::Upstream(e) => e.body().cloned(),
                _ => None,
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after();
        let mut response = (status, Json(self.body())).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if let Some(secs) = retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;
