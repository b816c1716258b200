// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Sequential pairing on Globalping.
//!
//! The first family is created against the resolved locations; the second
//! passes the first measurement id as its location, which makes Globalping
//! reuse exactly the same probes.

use super::{by_family, literal_matches_family, PairingStrategy};
use crate::clients::GlobalpingClient;
use crate::error::{GatewayError, Result};
use crate::model::{
    AddressFamily, BackendKind, DescriptorKind, MeasurementPair, MeasurementRequest, PairFlow,
    ProbeSelectionDescriptor, Selection, SingleMeasurement, TraceProtocol, TypeOptions,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct SequentialPairing {
    client: GlobalpingClient,
}

impl SequentialPairing {
    pub fn new(client: GlobalpingClient) -> Self {
        Self { client }
    }
}

fn location(descriptor: &ProbeSelectionDescriptor) -> Result<Value> {
    let limit = descriptor.requested_count;
    match descriptor.kind {
        DescriptorKind::Area if descriptor.is_worldwide() => Ok(json!({ "magic": "world", "limit": limit })),
        DescriptorKind::Area => Ok(json!({ "magic": descriptor.value, "limit": limit })),
        DescriptorKind::Country => Ok(json!({ "country": descriptor.value, "limit": limit })),
        DescriptorKind::Asn => {
            let asn: u32 = descriptor.value.parse().map_err(|_| {
                GatewayError::Internal(format!("non-numeric asn descriptor {}", descriptor.value))
            })?;
            Ok(json!({ "asn": asn, "limit": limit }))
        }
        DescriptorKind::Prefix | DescriptorKind::ExplicitIds => Err(GatewayError::unsupported(
            "unsupported_location",
            format!("Globalping cannot select probes by {:?}", descriptor.kind),
        )),
    }
}

/// `measurementOptions` for one family. `ipVersion` is only sent for
/// hostname targets; a literal already fixes the family.
fn measurement_options(request: &MeasurementRequest, family: Option<AddressFamily>) -> Value {
    let mut options = match &request.options {
        TypeOptions::Ping(o) => json!({ "packets": o.packets }),
        TypeOptions::Traceroute(o) => {
            let mut v = json!({ "protocol": o.protocol });
            if o.protocol == TraceProtocol::Tcp {
                if let Some(port) = o.port {
                    v["port"] = json!(port);
                }
            }
            v
        }
        TypeOptions::Mtr(o) => {
            let mut v = json!({ "protocol": o.protocol, "packets": o.packets });
            if let Some(port) = o.port {
                v["port"] = json!(port);
            }
            v
        }
        TypeOptions::Dns(o) => {
            let mut v = json!({
                "query": { "type": o.query_type },
                "protocol": o.protocol,
                "port": o.port,
                "trace": o.trace,
            });
            if let Some(resolver) = &o.resolver {
                v["resolver"] = json!(resolver);
            }
            v
        }
        TypeOptions::Http(o) => {
            let mut v = json!({
                "request": { "method": o.method.as_str(), "path": o.path, "query": o.query },
                "protocol": o.protocol,
            });
            if let Some(port) = o.port {
                v["port"] = json!(port);
            }
            if let Some(resolver) = &o.resolver {
                v["resolver"] = json!(resolver);
            }
            v
        }
    };
    if let Some(family) = family {
        options["ipVersion"] = json!(family.number());
    }
    options
}

fn body(request: &MeasurementRequest, family: Option<AddressFamily>, locations: Value) -> Value {
    json!({
        "type": request.measurement_type().as_str(),
        "target": request.target,
        "locations": locations,
        "measurementOptions": measurement_options(request, family),
    })
}

#[async_trait]
impl PairingStrategy for SequentialPairing {
    fn backend(&self) -> BackendKind {
        BackendKind::Globalping
    }

    async fn create_pair(
        &self,
        request: &MeasurementRequest,
        selection: &Selection,
        flow: PairFlow,
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MeasurementPair> {
        let locations = selection
            .descriptors
            .iter()
            .map(location)
            .collect::<Result<Vec<_>>>()?;

        let first = flow.first();
        // Counts travel per location; Globalping refuses a global limit
        // alongside them.
        let first_body = body(request, Some(first), json!(locations));
        let created = self.client.create(credential, &first_body, cancel).await?;

        let second = first.other();
        let second_body = body(request, Some(second), json!(created.id));
        let reused = match self.client.create(credential, &second_body, cancel).await {
            Ok(reused) => reused,
            Err(e) => {
                warn!(first = %created.id, error = %e, "Second family failed; discarding pair");
                return Err(e.into());
            }
        };

        let (m4, m6) = by_family(first, created.id, reused.id);
        info!(%m4, %m6, ?flow, target = %request.target, "Globalping pair created");
        Ok(MeasurementPair {
            v4_handle: m4,
            v6_handle: m6,
            backend: BackendKind::Globalping,
            warnings: selection.warnings.clone(),
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
        let literal = literal_matches_family(&request.target, family)?;
        let single_body = body(request, (!literal).then_some(family), json!(reference));
        let created = self.client.create(credential, &single_body, cancel).await?;

        info!(m = %created.id, reference, ip_version = family.number(), "Globalping single created");
        Ok(SingleMeasurement {
            handle: created.id,
            ip_version: family,
            backend: BackendKind::Globalping,
            warnings: Vec::new(),
        })
    }
}
