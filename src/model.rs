// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Domain types shared by the validator, resolver, pairing and poller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Measurement provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// RIPE Atlas: atomic dual-definition creation, settle-detection polling
    Atlas,
    /// Globalping: sequential creation with probe reuse, revalidation polling
    Globalping,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Atlas => "atlas",
            Self::Globalping => "globalping",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atlas" | "ripe" | "ripe-atlas" => Ok(Self::Atlas),
            "globalping" | "gp" => Ok(Self::Globalping),
            _ => Err(()),
        }
    }
}

/// Per-backend limits applied while sanitizing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendProfile {
    pub backend: BackendKind,
    pub max_probes: u32,
    pub max_packets: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementType {
    Ping,
    Traceroute,
    Mtr,
    Dns,
    Http,
}

impl MeasurementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Traceroute => "traceroute",
            Self::Mtr => "mtr",
            Self::Dns => "dns",
            Self::Http => "http",
        }
    }

    /// Whether a bare IP address is an acceptable target for this type.
    pub fn allows_ip_target(&self) -> bool {
        !matches!(self, Self::Dns)
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasurementType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ping" => Ok(Self::Ping),
            "traceroute" => Ok(Self::Traceroute),
            "mtr" => Ok(Self::Mtr),
            "dns" => Ok(Self::Dns),
            "http" => Ok(Self::Http),
            _ => Err(()),
        }
    }
}

/// IPv4 or IPv6. Serialized as the bare number `4` / `6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn number(&self) -> u8 {
        match self {
            Self::V4 => 4,
            Self::V6 => 6,
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::V4 => Self::V6,
            Self::V6 => Self::V4,
        }
    }
}

impl TryFrom<u8> for AddressFamily {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(Self::V4),
            6 => Ok(Self::V6),
            other => Err(format!("unsupported ip version {other}")),
        }
    }
}

impl From<AddressFamily> for u8 {
    fn from(af: AddressFamily) -> Self {
        af.number()
    }
}

/// Which address family is created first in a sequential pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PairFlow {
    #[default]
    #[serde(rename = "v4-first")]
    V4First,
    #[serde(rename = "v6-first")]
    V6First,
}

impl PairFlow {
    pub fn first(&self) -> AddressFamily {
        match self {
            Self::V4First => AddressFamily::V4,
            Self::V6First => AddressFamily::V6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TraceProtocol {
    Icmp,
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsProtocol {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpProtocol {
    Http,
    Https,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingOptions {
    pub packets: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteOptions {
    pub protocol: TraceProtocol,
    pub port: Option<u16>,
    pub packets: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtrOptions {
    pub protocol: TraceProtocol,
    pub port: Option<u16>,
    pub packets: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsOptions {
    pub query_type: String,
    pub protocol: DnsProtocol,
    pub port: u16,
    pub resolver: Option<String>,
    pub trace: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpOptions {
    pub protocol: HttpProtocol,
    pub method: HttpMethod,
    pub path: String,
    pub query: String,
    pub resolver: Option<String>,
    pub port: Option<u16>,
}

/// Sanitized per-type options; the variant always matches the request type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TypeOptions {
    Ping(PingOptions),
    Traceroute(TracerouteOptions),
    Mtr(MtrOptions),
    Dns(DnsOptions),
    Http(HttpOptions),
}

impl TypeOptions {
    pub fn measurement_type(&self) -> MeasurementType {
        match self {
            Self::Ping(_) => MeasurementType::Ping,
            Self::Traceroute(_) => MeasurementType::Traceroute,
            Self::Mtr(_) => MeasurementType::Mtr,
            Self::Dns(_) => MeasurementType::Dns,
            Self::Http(_) => MeasurementType::Http,
        }
    }
}

/// A fully validated measurement request. Only the validator builds these.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRequest {
    pub target: String,
    pub options: TypeOptions,
    pub location_hint: String,
    pub probe_count: u32,
    /// Restrict Atlas probes to ones tagged as IPv6-capable
    pub ipv6_capable_only: bool,
}

impl MeasurementRequest {
    pub fn measurement_type(&self) -> MeasurementType {
        self.options.measurement_type()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DescriptorKind {
    Area,
    Country,
    Asn,
    Prefix,
    ExplicitIds,
}

/// One provider-neutral probe-selection bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSelectionDescriptor {
    pub requested_count: u32,
    pub kind: DescriptorKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags_include: Vec<String>,
}

impl ProbeSelectionDescriptor {
    pub const WORLDWIDE: &'static str = "WW";

    pub fn new(kind: DescriptorKind, value: impl Into<String>, requested_count: u32) -> Self {
        Self {
            requested_count,
            kind,
            value: value.into(),
            tags_include: Vec::new(),
        }
    }

    pub fn worldwide(requested_count: u32) -> Self {
        Self::new(DescriptorKind::Area, Self::WORLDWIDE, requested_count)
    }

    pub fn is_worldwide(&self) -> bool {
        self.kind == DescriptorKind::Area && self.value == Self::WORLDWIDE
    }

    /// Explicit probe ids, parsed back out of the comma-joined value.
    pub fn explicit_ids(&self) -> Vec<u64> {
        if self.kind != DescriptorKind::ExplicitIds {
            return Vec::new();
        }
        self.value
            .split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect()
    }
}

/// Descriptors plus any warnings produced while resolving them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Selection {
    pub descriptors: Vec<ProbeSelectionDescriptor>,
    pub warnings: Vec<String>,
}

impl Selection {
    pub fn total_requested(&self) -> u32 {
        self.descriptors.iter().map(|d| d.requested_count).sum()
    }
}

/// Two measurement handles guaranteed to share a vantage-point set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasurementPair {
    #[serde(rename = "m4")]
    pub v4_handle: String,
    #[serde(rename = "m6")]
    pub v6_handle: String,
    pub backend: BackendKind,
    pub warnings: Vec<String>,
}

/// One measurement added to an existing pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleMeasurement {
    #[serde(rename = "m")]
    pub handle: String,
    pub ip_version: AddressFamily,
    pub backend: BackendKind,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeasurementStatus {
    InProgress,
    Finished,
    Failed,
}

/// Why a poll stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusReason {
    /// The provider reported a terminal status
    Provider,
    /// The result count stopped changing
    Settled,
    /// The wall-clock budget ran out
    Timeout,
}

impl StatusReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Settled => "settled",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub id: String,
    pub city: Option<String>,
    pub country: Option<String>,
    pub asn: Option<u32>,
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    pub hop: u32,
    pub address: Option<String>,
    pub rtts: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asn: Option<u32>,
}

/// Normalized per-type result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ResultPayload {
    Ping {
        avg_ms: Option<f64>,
        min_ms: Option<f64>,
        max_ms: Option<f64>,
        sent: u32,
        received: u32,
        loss_pct: Option<f64>,
    },
    Traceroute {
        hops: Vec<Hop>,
    },
    Mtr {
        hops: Vec<Hop>,
    },
    Dns {
        total_ms: Option<f64>,
        answers: serde_json::Value,
    },
    Http {
        status_code: Option<u16>,
        total_ms: Option<f64>,
    },
}

/// One probe's normalized result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub probe: ProbeInfo,
    pub status: MeasurementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub result: ResultPayload,
}

/// Status response for one measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementSnapshot {
    pub backend: BackendKind,
    pub id: String,
    pub status: MeasurementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<StatusReason>,
    pub results: Vec<ResultRecord>,
}
