// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! RIPE Atlas REST client.

use super::{check_status, read_json, send, UpstreamError};
use crate::model::ProbeInfo;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

const BACKEND: &str = "atlas";

/// Atlas caps `id__in` lookups; larger sets are chunked.
pub const PROBE_BATCH_SIZE: usize = 500;

/// Measurement status names after which no new results arrive.
const TERMINAL_STATUSES: &[&str] = &[
    "Stopped",
    "Forced to stop",
    "No suitable probes",
    "Failed",
    "Denied",
    "Canceled",
];

/// Terminal statuses that mean the measurement never ran properly.
const FAILED_STATUSES: &[&str] = &["No suitable probes", "Failed", "Denied", "Canceled"];

#[derive(Debug, Clone, Deserialize)]
pub struct AtlasStatus {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AtlasMeasurement {
    pub id: u64,
    pub status: AtlasStatus,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub stop_time: Option<i64>,
    #[serde(default, rename = "type")]
    pub measurement_type: Option<String>,
    #[serde(default)]
    pub participant_count: Option<u32>,
}

impl AtlasMeasurement {
    pub fn is_terminal(&self) -> bool {
        TERMINAL_STATUSES.contains(&self.status.name.as_str())
    }

    pub fn is_failed(&self) -> bool {
        FAILED_STATUSES.contains(&self.status.name.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct CreatedMeasurements {
    #[serde(default)]
    measurements: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct ProbeRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct AllocatedProbes {
    #[serde(default)]
    probes: Vec<ProbeRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AtlasGeometry {
    /// GeoJSON order: `[lon, lat]`
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AtlasProbe {
    pub id: u64,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub asn_v4: Option<u32>,
    #[serde(default)]
    pub asn_v6: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub geometry: Option<AtlasGeometry>,
}

impl From<AtlasProbe> for ProbeInfo {
    fn from(probe: AtlasProbe) -> Self {
        let coords = probe
            .geometry
            .map(|g| g.coordinates)
            .unwrap_or_default();
        ProbeInfo {
            id: probe.id.to_string(),
            city: None,
            country: probe.country_code,
            asn: probe.asn_v4.or(probe.asn_v6),
            network: probe.description,
            lat: coords.get(1).copied(),
            lon: coords.first().copied(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbePage {
    #[serde(default)]
    results: Vec<AtlasProbe>,
}

/// RIPE Atlas API client
#[derive(Debug, Clone)]
pub struct AtlasClient {
    base_url: Url,
    http: Client,
}

impl AtlasClient {
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

    fn authorized(&self, builder: reqwest::RequestBuilder, key: Option<&str>) -> reqwest::RequestBuilder {
        match key {
            Some(key) => builder.header("Authorization", format!("Key {key}")),
            None => builder,
        }
    }

    /// Create one or more measurements in a single call.
    ///
    /// Returns the ids in definition order.
    pub async fn create(
        &self,
        key: &str,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Vec<u64>, UpstreamError> {
        let url = self.url("/api/v2/measurements/")?;
        let request = self.authorized(self.http.post(url), Some(key)).json(body);
        let response = check_status(BACKEND, send(BACKEND, request, cancel).await?, cancel).await?;
        let created: CreatedMeasurements = read_json(BACKEND, response, cancel).await?;
        debug!(ids = ?created.measurements, "Atlas measurements created");
        Ok(created.measurements)
    }

    pub async fn measurement(
        &self,
        key: Option<&str>,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<AtlasMeasurement, UpstreamError> {
        let url = self.url(&format!("/api/v2/measurements/{id}/"))?;
        let request = self.authorized(self.http.get(url), key);
        let response = check_status(BACKEND, send(BACKEND, request, cancel).await?, cancel).await?;
        read_json(BACKEND, response, cancel).await
    }

    /// Probes the scheduler actually assigned to a measurement.
    pub async fn allocated_probes(
        &self,
        key: Option<&str>,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<u64>, UpstreamError> {
        let mut url = self.url(&format!("/api/v2/measurements/{id}/"))?;
        url.query_pairs_mut().append_pair("fields", "probes");
        let request = self.authorized(self.http.get(url), key);
        let response = check_status(BACKEND, send(BACKEND, request, cancel).await?, cancel).await?;
        let allocated: AllocatedProbes = read_json(BACKEND, response, cancel).await?;
        Ok(allocated.probes.into_iter().map(|p| p.id).collect())
    }

    /// Raw result rows, optionally restricted to a `[start, stop]` window.
    pub async fn results(
        &self,
        key: Option<&str>,
        id: u64,
        window: Option<(i64, i64)>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, UpstreamError> {
        let mut url = self.url(&format!("/api/v2/measurements/{id}/results/"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("format", "json");
            if let Some((start, stop)) = window {
                query.append_pair("start", &start.to_string());
                query.append_pair("stop", &stop.to_string());
            }
        }
        let request = self.authorized(self.http.get(url), key);
        let response = check_status(BACKEND, send(BACKEND, request, cancel).await?, cancel).await?;
        read_json(BACKEND, response, cancel).await
    }

    /// Batch probe metadata lookup. `ids` must not exceed [`PROBE_BATCH_SIZE`].
    pub async fn probes(
        &self,
        ids: &[u64],
        cancel: &CancellationToken,
    ) -> Result<Vec<AtlasProbe>, UpstreamError> {
        let joined = ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
        let mut url = self.url("/api/v2/probes/")?;
        url.query_pairs_mut()
            .append_pair("id__in", &joined)
            .append_pair("page_size", &PROBE_BATCH_SIZE.to_string());
        let response = check_status(BACKEND, send(BACKEND, self.http.get(url), cancel).await?, cancel).await?;
        let page: ProbePage = read_json(BACKEND, response, cancel).await?;
        Ok(page.results)
    }

    pub async fn probe(&self, id: u64, cancel: &CancellationToken) -> Result<AtlasProbe, UpstreamError> {
        let url = self.url(&format!("/api/v2/probes/{id}/"))?;
        let response = check_status(BACKEND, send(BACKEND, self.http.get(url), cancel).await?, cancel).await?;
        read_json(BACKEND, response, cancel).await
    }
}
