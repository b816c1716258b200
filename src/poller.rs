// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Result polling.
//!
//! Two completion models, one per provider:
//!
//! - **Settle detection** (Atlas): done when the provider reports a terminal
//!   status, or when the number of result rows is positive and unchanged for
//!   `settle_polls` consecutive polls.
//! - **Revalidation** (Globalping): conditional GETs with `If-None-Match`;
//!   done when the provider status leaves `in-progress`.
//!
//! Either way a poll never runs past its wall-clock budget. On expiry it
//! returns whatever it has with `statusReason: timeout`.

use crate::clients::atlas::AtlasMeasurement;
use crate::clients::globalping::Fetched;
use crate::clients::{AtlasClient, GlobalpingClient};
use crate::config::PollConfig;
use crate::error::{GatewayError, Result};
use crate::model::{BackendKind, MeasurementSnapshot, MeasurementStatus, StatusReason};
use crate::normalize;
use crate::probes::ProbeDirectory;
use crate::validator::ValidationError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub settle_polls: u32,
    pub timeout: Duration,
    pub interval: Duration,
}

impl From<&PollConfig> for PollSettings {
    fn from(config: &PollConfig) -> Self {
        Self {
            settle_polls: config.settle_polls,
            timeout: config.timeout(),
            interval: config.interval(),
        }
    }
}

/// Counts consecutive polls that saw the same number of results.
#[derive(Debug, Clone)]
pub struct SettleTracker {
    settle_polls: u32,
    last_count: Option<usize>,
    unchanged_polls: u32,
}

impl SettleTracker {
    pub fn new(settle_polls: u32) -> Self {
        Self {
            settle_polls: settle_polls.max(1),
            last_count: None,
            unchanged_polls: 0,
        }
    }

    /// Record one poll; returns why polling may stop, if it may.
    pub fn observe(&mut self, provider_done: bool, count: usize) -> Option<StatusReason> {
        if self.last_count == Some(count) {
            self.unchanged_polls += 1;
        } else {
            self.last_count = Some(count);
            self.unchanged_polls = 1;
        }

        if provider_done {
            return Some(StatusReason::Provider);
        }
        (count > 0 && self.unchanged_polls >= self.settle_polls).then_some(StatusReason::Settled)
    }
}

/// Polls one measurement until it completes or the budget runs out.
#[async_trait]
pub trait CompletionPoller: Send + Sync {
    async fn poll(
        &self,
        id: &str,
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MeasurementSnapshot>;
}

/// Sleep for at most `interval`, never past `deadline`.
async fn pause(interval: Duration, deadline: Instant, cancel: &CancellationToken) -> Result<()> {
    let wake = (Instant::now() + interval).min(deadline);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        _ = tokio::time::sleep_until(wake) => Ok(()),
    }
}

/// Settle-detection poller for RIPE Atlas.
pub struct SettlePoller {
    client: AtlasClient,
    probes: ProbeDirectory,
    settings: PollSettings,
}

impl SettlePoller {
    pub fn new(client: AtlasClient, probes: ProbeDirectory, settings: PollSettings) -> Self {
        Self {
            client,
            probes,
            settings,
        }
    }

    async fn snapshot(
        &self,
        id: u64,
        measurement: &AtlasMeasurement,
        rows: &[Value],
        reason: StatusReason,
        cancel: &CancellationToken,
    ) -> MeasurementSnapshot {
        let probes = self
            .probes
            .resolve(&normalize::atlas_probe_ids(rows), cancel)
            .await;
        let status = match reason {
            StatusReason::Timeout => MeasurementStatus::InProgress,
            _ if measurement.is_failed() => MeasurementStatus::Failed,
            _ => MeasurementStatus::Finished,
        };
        MeasurementSnapshot {
            backend: BackendKind::Atlas,
            id: id.to_string(),
            status,
            status_reason: Some(reason),
            results: normalize::atlas_rows(rows, &probes),
        }
    }
}

#[async_trait]
impl CompletionPoller for SettlePoller {
    async fn poll(
        &self,
        id: &str,
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MeasurementSnapshot> {
        let numeric: u64 = id
            .parse()
            .map_err(|_| ValidationError::InvalidHandle(id.to_string()))?;
        let deadline = Instant::now() + self.settings.timeout;
        let mut tracker = SettleTracker::new(self.settings.settle_polls);
        let mut polls = 0u32;

        loop {
            polls += 1;
            let measurement = self.client.measurement(credential, numeric, cancel).await?;
            let rows = self.client.results(credential, numeric, None, cancel).await?;

            if let Some(reason) = tracker.observe(measurement.is_terminal(), rows.len()) {
                info!(id, polls, rows = rows.len(), reason = reason.as_str(), "Atlas measurement complete");
                return Ok(self.snapshot(numeric, &measurement, &rows, reason, cancel).await);
            }

            if Instant::now() >= deadline {
                info!(id, polls, rows = rows.len(), "Atlas poll budget exhausted");
                return Ok(self
                    .snapshot(numeric, &measurement, &rows, StatusReason::Timeout, cancel)
                    .await);
            }

            debug!(id, polls, rows = rows.len(), status = %measurement.status.name, "Atlas measurement pending");
            pause(self.settings.interval, deadline, cancel).await?;
        }
    }
}

/// ETag revalidation poller for Globalping.
pub struct RevalidatingPoller {
    client: GlobalpingClient,
    settings: PollSettings,
}

impl RevalidatingPoller {
    pub fn new(client: GlobalpingClient, settings: PollSettings) -> Self {
        Self { client, settings }
    }

    fn snapshot(id: &str, body: &Value, reason: StatusReason) -> MeasurementSnapshot {
        let status = match reason {
            StatusReason::Timeout => MeasurementStatus::InProgress,
            _ => normalize::globalping_status(body),
        };
        MeasurementSnapshot {
            backend: BackendKind::Globalping,
            id: id.to_string(),
            status,
            status_reason: Some(reason),
            results: normalize::globalping_results(body),
        }
    }
}

#[async_trait]
impl CompletionPoller for RevalidatingPoller {
    async fn poll(
        &self,
        id: &str,
        _credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MeasurementSnapshot> {
        let deadline = Instant::now() + self.settings.timeout;
        let mut etag: Option<String> = None;
        let mut latest = Value::Null;
        let mut polls = 0u32;

        loop {
            polls += 1;
            match self.client.measurement(id, etag.as_deref(), cancel).await? {
                Fetched::NotModified => debug!(id, polls, "Globalping measurement unchanged"),
                Fetched::Modified { etag: tag, body } => {
                    etag = tag;
                    latest = body;
                }
            }

            if normalize::globalping_status(&latest) != MeasurementStatus::InProgress {
                info!(id, polls, "Globalping measurement complete");
                return Ok(Self::snapshot(id, &latest, StatusReason::Provider));
            }

            if Instant::now() >= deadline {
                info!(id, polls, "Globalping poll budget exhausted");
                return Ok(Self::snapshot(id, &latest, StatusReason::Timeout));
            }

            pause(self.settings.interval, deadline, cancel).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::ProbeLookup;
    use crate::tasks::BackgroundQueue;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(timeout_ms: u64) -> PollSettings {
        PollSettings {
            settle_polls: 2,
            timeout: Duration::from_millis(timeout_ms),
            interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_settle_on_repeated_count() {
        let mut t = SettleTracker::new(2);
        assert_eq!(t.observe(false, 4), None);
        assert_eq!(t.observe(false, 4), Some(StatusReason::Settled));
    }

    #[test]
    fn test_change_resets_counter() {
        let mut t = SettleTracker::new(3);
        assert_eq!(t.observe(false, 1), None);
        assert_eq!(t.observe(false, 1), None);
        assert_eq!(t.observe(false, 2), None);
        assert_eq!(t.observe(false, 2), None);
        assert_eq!(t.observe(false, 2), Some(StatusReason::Settled));
    }

    #[test]
    fn test_zero_rows_never_settle() {
        let mut t = SettleTracker::new(1);
        for _ in 0..5 {
            assert_eq!(t.observe(false, 0), None);
        }
        assert_eq!(t.observe(true, 0), Some(StatusReason::Provider));
    }

    #[test]
    fn test_provider_terminal_wins() {
        let mut t = SettleTracker::new(5);
        assert_eq!(t.observe(true, 3), Some(StatusReason::Provider));
    }

    fn directory(client: AtlasClient) -> ProbeDirectory {
        let (queue, _) = BackgroundQueue::start(4, 1);
        ProbeDirectory::new(Arc::new(client) as Arc<dyn ProbeLookup>, Duration::from_secs(60), 2, queue)
    }

    async fn atlas_fixture(status: &str, rows: Value) -> (MockServer, SettlePoller) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/measurements/42/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42, "status": {"id": 2, "name": status}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/measurements/42/results/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/probes/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": 1, "country_code": "SE"}]
            })))
            .mount(&server)
            .await;
        let client = AtlasClient::new(&server.uri(), reqwest::Client::new()).unwrap();
        let poller = SettlePoller::new(client.clone(), directory(client), settings(2_000));
        (server, poller)
    }

    #[tokio::test]
    async fn test_atlas_settles_on_stable_rows() {
        let rows = json!([{"type": "ping", "prb_id": 1, "sent": 2, "rcvd": 2, "min": 1, "avg": 1, "max": 1}]);
        let (_server, poller) = atlas_fixture("Ongoing", rows).await;

        let snapshot = poller.poll("42", None, &CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.status, MeasurementStatus::Finished);
        assert_eq!(snapshot.status_reason, Some(StatusReason::Settled));
        assert_eq!(snapshot.results.len(), 1);
        assert_eq!(snapshot.results[0].probe.country.as_deref(), Some("SE"));
    }

    #[tokio::test]
    async fn test_atlas_provider_terminal() {
        let (_server, poller) = atlas_fixture("Stopped", json!([])).await;
        let snapshot = poller.poll("42", None, &CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.status_reason, Some(StatusReason::Provider));
        assert_eq!(snapshot.status, MeasurementStatus::Finished);
    }

    #[tokio::test]
    async fn test_atlas_timeout_returns_partial() {
        let (_server, poller) = atlas_fixture("Ongoing", json!([])).await;
        let poller = SettlePoller { settings: settings(60), ..poller };
        let snapshot = poller.poll("42", None, &CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.status, MeasurementStatus::InProgress);
        assert_eq!(snapshot.status_reason, Some(StatusReason::Timeout));
        assert!(snapshot.results.is_empty());
    }

    #[tokio::test]
    async fn test_atlas_rejects_non_numeric_handle() {
        let (_server, poller) = atlas_fixture("Ongoing", json!([])).await;
        let err = poller.poll("abc", None, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code(), "invalid_handle");
    }

    #[tokio::test]
    async fn test_globalping_completes_on_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/measurements/abc"))
            .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"1\"").set_body_json(json!({
                "id": "abc", "type": "ping", "status": "finished",
                "results": [{"probe": {"country": "JP"}, "result": {"status": "finished", "stats": {"total": 3, "rcv": 3, "avg": 2.0}}}]
            })))
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(&server.uri(), reqwest::Client::new()).unwrap();
        let snapshot = RevalidatingPoller::new(client, settings(2_000))
            .poll("abc", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(snapshot.status, MeasurementStatus::Finished);
        assert_eq!(snapshot.status_reason, Some(StatusReason::Provider));
        assert_eq!(snapshot.results[0].probe.country.as_deref(), Some("JP"));
    }

    #[tokio::test]
    async fn test_globalping_timeout_keeps_last_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/measurements/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "slow", "type": "ping", "status": "in-progress",
                "results": [{"probe": {}, "result": {"status": "in-progress"}}]
            })))
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(&server.uri(), reqwest::Client::new()).unwrap();
        let snapshot = RevalidatingPoller::new(client, settings(60))
            .poll("slow", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(snapshot.status_reason, Some(StatusReason::Timeout));
        assert_eq!(snapshot.results.len(), 1);
        assert_eq!(snapshot.results[0].status, MeasurementStatus::InProgress);
    }

    #[tokio::test]
    async fn test_cancel_stops_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"type": "ping", "status": "in-progress"})))
            .mount(&server)
            .await;

        let client = GlobalpingClient::new(&server.uri(), reqwest::Client::new()).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let err = RevalidatingPoller::new(client, settings(5_000))
            .poll("x", None, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "cancelled");
    }
}
