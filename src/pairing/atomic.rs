// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Atomic pairing on RIPE Atlas: both families in one creation call.

use super::{literal_matches_family, PairingStrategy};
use crate::clients::{AtlasClient, UpstreamError};
use crate::error::{GatewayError, Result};
use crate::model::{
    AddressFamily, BackendKind, DescriptorKind, HttpProtocol, MeasurementPair, MeasurementRequest,
    MeasurementType, PairFlow, ProbeSelectionDescriptor, Selection, SingleMeasurement, TypeOptions,
};
use crate::normalize::atlas_probe_ids;
use crate::selection::explicit_id_descriptor;
use crate::validator::ValidationError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const BACKEND: &str = "atlas";

/// Window of results scanned when the allocated-probe listing is unavailable.
const FALLBACK_WINDOW_SECS: i64 = 3600;

/// Traceroute path variations per probe.
const PARIS_VARIATIONS: u32 = 16;

pub struct AtomicPairing {
    client: AtlasClient,
    max_explicit_ids: usize,
}

impl AtomicPairing {
    pub fn new(client: AtlasClient, max_explicit_ids: usize) -> Self {
        Self {
            client,
            max_explicit_ids,
        }
    }

    /// Probes the reference measurement actually ran on.
    async fn reference_probes(&self, key: &str, reference: u64, cancel: &CancellationToken) -> Result<Vec<u64>> {
        match self.client.allocated_probes(Some(key), reference, cancel).await {
            Ok(ids) if !ids.is_empty() => return Ok(ids),
            Ok(_) => debug!(reference, "No allocated probes listed, scanning results"),
            Err(UpstreamError::Cancelled) => return Err(GatewayError::Cancelled),
            Err(e) => debug!(reference, error = %e, "Allocated probe listing failed, scanning results"),
        }

        let measurement = self.client.measurement(Some(key), reference, cancel).await?;
        let start = measurement
            .start_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp() - FALLBACK_WINDOW_SECS);
        let rows = self
            .client
            .results(Some(key), reference, Some((start, start + FALLBACK_WINDOW_SECS)), cancel)
            .await?;
        Ok(atlas_probe_ids(&rows))
    }
}

fn probe_spec(descriptor: &ProbeSelectionDescriptor) -> Value {
    let kind = match descriptor.kind {
        DescriptorKind::Area => "area",
        DescriptorKind::Country => "country",
        DescriptorKind::Asn => "asn",
        DescriptorKind::Prefix => "prefix",
        DescriptorKind::ExplicitIds => "probes",
    };
    let mut spec = json!({
        "type": kind,
        "value": descriptor.value,
        "requested": descriptor.requested_count,
    });
    if !descriptor.tags_include.is_empty() {
        spec["tags"] = json!({ "include": descriptor.tags_include });
    }
    spec
}

/// One Atlas measurement definition plus any option warnings.
fn definition(request: &MeasurementRequest, family: AddressFamily) -> Result<(Value, Vec<String>)> {
    let mut warnings = Vec::new();
    let kind = request.measurement_type();

    let mut def = match &request.options {
        TypeOptions::Ping(o) => json!({ "type": "ping", "packets": o.packets }),
        TypeOptions::Traceroute(o) => {
            let mut d = json!({
                "type": "traceroute",
                "protocol": o.protocol,
                "packets": o.packets,
                "paris": PARIS_VARIATIONS,
            });
            if let Some(port) = o.port {
                d["port"] = json!(port);
            }
            d
        }
        TypeOptions::Mtr(_) => {
            return Err(GatewayError::unsupported(
                "unsupported_type",
                "RIPE Atlas does not offer MTR measurements",
            ))
        }
        TypeOptions::Dns(o) => {
            let mut d = json!({
                "type": "dns",
                "query_class": "IN",
                "query_type": o.query_type,
                "query_argument": request.target,
                "protocol": o.protocol,
                "use_probe_resolver": o.resolver.is_none(),
                "set_rd_bit": true,
            });
            if let Some(resolver) = &o.resolver {
                d["target"] = json!(resolver);
            }
            if o.trace {
                warnings.push("DNS trace is not available on RIPE Atlas; ignored".to_string());
            }
            if o.port != 53 {
                warnings.push(format!("DNS port {} is not configurable on RIPE Atlas; using 53", o.port));
            }
            d
        }
        TypeOptions::Http(o) => {
            if o.protocol == HttpProtocol::Https {
                warnings.push("RIPE Atlas HTTP measurements are plain HTTP; HTTPS ignored".to_string());
            }
            if o.resolver.is_some() {
                warnings.push("Custom resolvers are not available for RIPE Atlas HTTP; ignored".to_string());
            }
            json!({
                "type": "http",
                "method": o.method.as_str(),
                "path": o.path,
                "query_string": o.query,
                "port": o.port.unwrap_or(80),
                "version": "1.1",
                "header_bytes": 0,
                "timing_verbosity": 1,
            })
        }
    };

    def["af"] = json!(family.number());
    def["is_oneoff"] = json!(true);
    def["description"] = json!(format!("{kind} {} (IPv{})", request.target, family.number()));
    if kind != MeasurementType::Dns {
        def["target"] = json!(request.target);
        def["resolve_on_probe"] = json!(true);
    }

    Ok((def, warnings))
}

#[async_trait]
impl PairingStrategy for AtomicPairing {
    fn backend(&self) -> BackendKind {
        BackendKind::Atlas
    }

    fn requires_credential(&self) -> bool {
        true
    }

    async fn create_pair(
        &self,
        request: &MeasurementRequest,
        selection: &Selection,
        flow: PairFlow,
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MeasurementPair> {
        let key = credential.ok_or(GatewayError::MissingApiKey { backend: BACKEND })?;
        let (v4, option_warnings) = definition(request, AddressFamily::V4)?;
        let (v6, _) = definition(request, AddressFamily::V6)?;

        let body = json!({
            "definitions": [v4, v6],
            "probes": selection.descriptors.iter().map(probe_spec).collect::<Vec<_>>(),
        });
        debug!(?flow, descriptors = selection.descriptors.len(), "Submitting atomic pair");

        let ids = self.client.create(key, &body, cancel).await?;
        let (Some(m4), Some(m6)) = (ids.first(), ids.get(1)) else {
            return Err(GatewayError::PairIncomplete { received: ids.len() });
        };

        info!(m4, m6, target = %request.target, "Atlas pair created");
        Ok(MeasurementPair {
            v4_handle: m4.to_string(),
            v6_handle: m6.to_string(),
            backend: BackendKind::Atlas,
            warnings: selection.warnings.iter().cloned().chain(option_warnings).collect(),
        })
    }

    async fn create_single(
        &self,
        request: &MeasurementRequest,
        family: AddressFamily,
        reference: &str,
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SingleMeasurement> {
        let key = credential.ok_or(GatewayError::MissingApiKey { backend: BACKEND })?;
        literal_matches_family(&request.target, family)?;
        let reference_id: u64 = reference
            .parse()
            .map_err(|_| ValidationError::InvalidHandle(reference.to_string()))?;
        let (def, mut warnings) = definition(request, family)?;

        let probes = self.reference_probes(key, reference_id, cancel).await?;
        if probes.is_empty() {
            return Err(UpstreamError::bad_response(
                BACKEND,
                format!("measurement {reference_id} has no probes yet"),
            )
            .into());
        }
        let (descriptor, truncated) = explicit_id_descriptor(&probes, self.max_explicit_ids);
        warnings.extend(truncated);

        let body = json!({
            "definitions": [def],
            "probes": [probe_spec(&descriptor)],
        });
        let ids = self.client.create(key, &body, cancel).await?;
        let handle = ids
            .first()
            .ok_or_else(|| UpstreamError::bad_response(BACKEND, "creation returned no measurement id"))?;

        info!(m = handle, reference, ip_version = family.number(), "Atlas single created");
        Ok(SingleMeasurement {
            handle: handle.to_string(),
            ip_version: family,
            backend: BackendKind::Atlas,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DnsOptions, DnsProtocol, MtrOptions, PingOptions, TraceProtocol};
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ping_request() -> MeasurementRequest {
        MeasurementRequest {
            target: "example.com".to_string(),
            options: TypeOptions::Ping(PingOptions { packets: 3 }),
            location_hint: "DE".to_string(),
            probe_count: 2,
            ipv6_capable_only: true,
        }
    }

    fn selection() -> Selection {
        let mut d = ProbeSelectionDescriptor::new(DescriptorKind::Country, "DE", 2);
        d.tags_include = vec!["system-ipv4-works".into(), "system-ipv6-works".into()];
        Selection {
            descriptors: vec![d],
            warnings: vec!["from selection".into()],
        }
    }

    async fn pairing(server: &MockServer) -> AtomicPairing {
        AtomicPairing::new(AtlasClient::new(&server.uri(), reqwest::Client::new()).unwrap(), 50)
    }

    #[test]
    fn test_definition_shapes() {
        let (def, warnings) = definition(&ping_request(), AddressFamily::V6).unwrap();
        assert_eq!(def["af"], 6);
        assert_eq!(def["target"], "example.com");
        assert_eq!(def["packets"], 3);
        assert!(warnings.is_empty());

        let dns = MeasurementRequest {
            options: TypeOptions::Dns(DnsOptions {
                query_type: "AAAA".into(),
                protocol: DnsProtocol::Udp,
                port: 5353,
                resolver: None,
                trace: true,
            }),
            ..ping_request()
        };
        let (def, warnings) = definition(&dns, AddressFamily::V4).unwrap();
        assert_eq!(def["query_argument"], "example.com");
        assert_eq!(def["use_probe_resolver"], true);
        assert!(def.get("target").is_none());
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_mtr_unsupported() {
        let mtr = MeasurementRequest {
            options: TypeOptions::Mtr(MtrOptions {
                protocol: TraceProtocol::Icmp,
                port: None,
                packets: 3,
            }),
            ..ping_request()
        };
        let err = definition(&mtr, AddressFamily::V4).unwrap_err();
        assert_eq!(err.code(), "unsupported_type");
        assert_eq!(err.status().as_u16(), 501);
    }

    #[test]
    fn test_probe_spec_tags() {
        let spec = probe_spec(&selection().descriptors[0]);
        assert_eq!(spec["type"], "country");
        assert_eq!(spec["requested"], 2);
        assert_eq!(spec["tags"]["include"][1], "system-ipv6-works");
    }

    #[tokio::test]
    async fn test_pair_single_call_both_families() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/measurements/"))
            .and(body_partial_json(json!({"definitions": [{"af": 4}, {"af": 6}]})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"measurements": [100, 101]})))
            .expect(1)
            .mount(&server)
            .await;

        let pair = pairing(&server)
            .await
            .create_pair(&ping_request(), &selection(), PairFlow::V6First, Some("k"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(pair.v4_handle, "100");
        assert_eq!(pair.v6_handle, "101");
        assert_eq!(pair.warnings, vec!["from selection".to_string()]);
    }

    #[tokio::test]
    async fn test_pair_incomplete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"measurements": [100]})))
            .mount(&server)
            .await;

        let err = pairing(&server)
            .await
            .create_pair(&ping_request(), &selection(), PairFlow::V4First, Some("k"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "pair_incomplete");
        assert_eq!(err.status().as_u16(), 502);
    }

    #[tokio::test]
    async fn test_pair_requires_key() {
        let server = MockServer::start().await;
        let err = pairing(&server)
            .await
            .create_pair(&ping_request(), &selection(), PairFlow::V4First, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "missing_api_key");
    }

    #[tokio::test]
    async fn test_single_reuses_allocated_probes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/measurements/100/"))
            .and(query_param("fields", "probes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"probes": [{"id": 5}, {"id": 6}]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/measurements/"))
            .and(body_partial_json(json!({
                "definitions": [{"af": 6}],
                "probes": [{"type": "probes", "value": "5,6", "requested": 2}]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"measurements": [102]})))
            .expect(1)
            .mount(&server)
            .await;

        let single = pairing(&server)
            .await
            .create_single(&ping_request(), AddressFamily::V6, "100", Some("k"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(single.handle, "102");
        assert_eq!(single.ip_version, AddressFamily::V6);
    }

    #[tokio::test]
    async fn test_single_falls_back_to_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/measurements/100/"))
            .and(query_param("fields", "probes"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/measurements/100/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 100, "status": {"id": 4, "name": "Stopped"}, "start_time": 1000
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/measurements/100/results/"))
            .and(query_param("start", "1000"))
            .and(query_param("stop", "4600"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"prb_id": 9}, {"prb_id": 9}, {"prb_id": 3}])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"probes": [{"value": "9,3"}]})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"measurements": [103]})))
            .expect(1)
            .mount(&server)
            .await;

        let single = pairing(&server)
            .await
            .create_single(&ping_request(), AddressFamily::V4, "100", Some("k"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(single.handle, "103");
    }

    #[tokio::test]
    async fn test_single_caps_probe_list() {
        let server = MockServer::start().await;
        let probes: Vec<Value> = (1..=60).map(|id| json!({"id": id})).collect();
        Mock::given(method("GET"))
            .and(path("/api/v2/measurements/100/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"probes": probes})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"probes": [{"requested": 50}]})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"measurements": [104]})))
            .mount(&server)
            .await;

        let single = pairing(&server)
            .await
            .create_single(&ping_request(), AddressFamily::V4, "100", Some("k"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(single.warnings.iter().any(|w| w.contains("truncated")));
    }
}
