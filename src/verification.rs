// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Human verification of measurement-creating requests.
//!
//! Tokens are checked against a Turnstile-compatible `siteverify` endpoint.
//! The check fails closed: an unreachable verifier is a rejection.

use crate::clients::{read_json, send, UpstreamError};
use crate::config::VerificationConfig;
use crate::error::GatewayError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SERVICE: &str = "turnstile";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("token rejected")]
    Failed { error_codes: Vec<String> },

    #[error("token issued for action {actual:?}, expected {expected:?}")]
    BadAction { expected: String, actual: Option<String> },

    #[error("token issued for hostname {actual:?}")]
    BadHostname { actual: Option<String> },
}

impl VerificationFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "turnstile_failed",
            Self::BadAction { .. } => "turnstile_bad_action",
            Self::BadHostname { .. } => "turnstile_bad_hostname",
        }
    }
}

/// Checks a human-verification token.
#[async_trait]
pub trait HumanVerifier: Send + Sync {
    async fn verify(
        &self,
        token: &str,
        remote_ip: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError>;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Turnstile `siteverify` client
pub struct TurnstileVerifier {
    http: Client,
    config: VerificationConfig,
}

impl TurnstileVerifier {
    pub fn new(http: Client, config: VerificationConfig) -> Self {
        Self { http, config }
    }

    fn check(&self, outcome: SiteVerifyResponse) -> Result<(), VerificationFailure> {
        if !outcome.success {
            return Err(VerificationFailure::Failed {
                error_codes: outcome.error_codes,
            });
        }

        if let Some(expected) = &self.config.expected_action {
            if outcome.action.as_deref() != Some(expected.as_str()) {
                return Err(VerificationFailure::BadAction {
                    expected: expected.clone(),
                    actual: outcome.action,
                });
            }
        }

        if !self.config.expected_hostnames.is_empty() {
            let matches = outcome.hostname.as_deref().is_some_and(|host| {
                self.config
                    .expected_hostnames
                    .iter()
                    .any(|h| h.eq_ignore_ascii_case(host))
            });
            if !matches {
                return Err(VerificationFailure::BadHostname {
                    actual: outcome.hostname,
                });
            }
        }

        Ok(())
    }
}

#[async_trait]
impl HumanVerifier for TurnstileVerifier {
    async fn verify(
        &self,
        token: &str,
        remote_ip: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        let secret = self.config.secret.as_deref().ok_or_else(|| {
            GatewayError::config(
                "verification_unconfigured",
                "human verification secret is not configured",
            )
        })?;

        if token.trim().is_empty() {
            return Err(VerificationFailure::Failed {
                error_codes: vec!["missing-input-response".to_string()],
            }
            .into());
        }

        let mut form = vec![("secret", secret), ("response", token)];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip));
        }
        let request = self.http.post(&self.config.verify_url).form(&form);

        let outcome = match send(SERVICE, request, cancel).await {
            Ok(response) => read_json::<SiteVerifyResponse>(SERVICE, response, cancel).await,
            Err(e) => Err(e),
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(UpstreamError::Cancelled) => return Err(GatewayError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Verification service unreachable, rejecting token");
                return Err(VerificationFailure::Failed {
                    error_codes: vec!["internal-error".to_string()],
                }
                .into());
            }
        };

        self.check(outcome).map_err(|failure| {
            debug!(code = failure.code(), "Verification rejected");
            GatewayError::from(failure)
        })
    }
}
