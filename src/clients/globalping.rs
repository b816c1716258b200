// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Globalping REST client.

use super::{check_status, read_json, send, UpstreamError};
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

const BACKEND: &str = "globalping";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedMeasurement {
    pub id: String,
    #[serde(default)]
    pub probes_count: Option<u32>,
}

/// Outcome of a conditional fetch.
#[derive(Debug, Clone)]
pub enum Fetched {
    /// Entity tag still matched; nothing new.
    NotModified,
    Modified { etag: Option<String>, body: Value },
}

/// Globalping API client
#[derive(Debug, Clone)]
pub struct GlobalpingClient {
    base_url: Url,
    http: Client,
}

impl GlobalpingClient {
    pub fn new(base_url: &str, http: Client) -> Result<Self, url::ParseError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            http,
        })
    }

    fn url(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base_url
            .join(path)
            .map_err(|e| UpstreamError::bad_response(BACKEND, format!("bad url {path}: {e}")))
    }

    pub async fn create(
        &self,
        token: Option<&str>,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<CreatedMeasurement, UpstreamError> {
        let mut request = self.http.post(self.url("/v1/measurements")?).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = check_status(BACKEND, send(BACKEND, request, cancel).await?, cancel).await?;
        let created: CreatedMeasurement = read_json(BACKEND, response, cancel).await?;
        debug!(id = %created.id, probes = ?created.probes_count, "Globalping measurement created");
        Ok(created)
    }

    /// Fetch a measurement, revalidating against `etag` when one is held.
    pub async fn measurement(
        &self,
        id: &str,
        etag: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Fetched, UpstreamError> {
        let url = self.url(&format!("/v1/measurements/{}", urlencoding::encode(id)))?;
        let mut request = self.http.get(url);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        let response = check_status(BACKEND, send(BACKEND, request, cancel).await?, cancel).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = read_json(BACKEND, response, cancel).await?;
        Ok(Fetched::Modified { etag, body })
    }
}
