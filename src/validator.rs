// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Measurement request validator.
//!
//! Every untrusted field passes through here before it reaches a provider:
//! - Target hostname / IP literal sanitization
//! - Resolver host sanitization
//! - Per-type option clamping with silent fallback for unknown enum values
//!
//! All functions are pure. Expected bad input yields a [`ValidationError`]
//! carrying a stable code; nothing here panics on user data.

use crate::model::{
    BackendProfile, DnsOptions, DnsProtocol, HttpMethod, HttpOptions, HttpProtocol,
    MeasurementRequest, MeasurementType, MtrOptions, PingOptions, TraceProtocol,
    TracerouteOptions, TypeOptions,
};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde_json::Value;
use std::net::IpAddr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Longest accepted hostname (RFC 1035).
pub const MAX_HOST_LEN: usize = 253;

/// HTTP path and query strings are cut to this many characters.
pub const MAX_HTTP_FIELD_LEN: usize = 1024;

const UNSAFE_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal", ".lan", ".home"];

const UNSAFE_NAMES: &[&str] = &["localhost", "local", "internal", "lan", "home"];

const RESTRICTED_V4: &[&str] = &[
    "0.0.0.0/8",          // "this" network
    "10.0.0.0/8",         // RFC 1918
    "100.64.0.0/10",      // RFC 6598 shared address space
    "127.0.0.0/8",        // loopback
    "169.254.0.0/16",     // RFC 3927 link-local
    "172.16.0.0/12",      // RFC 1918
    "192.0.0.0/24",       // IETF protocol assignments
    "192.0.2.0/24",       // RFC 5737 TEST-NET-1
    "192.88.99.0/24",     // 6to4 relay anycast
    "192.168.0.0/16",     // RFC 1918
    "198.18.0.0/15",      // RFC 2544 benchmarking
    "198.51.100.0/24",    // RFC 5737 TEST-NET-2
    "203.0.113.0/24",     // RFC 5737 TEST-NET-3
    "224.0.0.0/4",        // multicast
    "240.0.0.0/4",        // reserved
    "255.255.255.255/32", // broadcast
];

const RESTRICTED_V6: &[&str] = &[
    "::/128",
    "::1/128",
    "fe80::/10",
    "ff00::/8",
    "fc00::/7",
    "2001:db8::/32",
    "100::/64", // discard-only
];

const MAX_HANDLE_LEN: usize = 64;

const DNS_QUERY_TYPES: &[&str] = &[
    "A", "AAAA", "ANY", "CNAME", "DNSKEY", "DS", "HTTPS", "MX", "NS", "NSEC", "PTR", "RRSIG",
    "SOA", "SRV", "SVCB", "TXT",
];

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Invalid resolver {resolver:?}: {reason}")]
    InvalidResolver { resolver: String, reason: String },

    #[error("Unknown measurement type {0:?}")]
    InvalidType(String),

    #[error("Invalid option {field}: {reason}")]
    InvalidOption { field: &'static str, reason: String },

    #[error("Invalid location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Invalid measurement handle {0:?}")]
    InvalidHandle(String),

    #[error("Unknown backend {0:?}")]
    UnknownBackend(String),
}

impl ValidationError {
    /// Stable error code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTarget { .. } => "invalid_target",
            Self::InvalidResolver { .. } => "invalid_resolver",
            Self::InvalidType(_) => "invalid_type",
            Self::InvalidOption { .. } => "invalid_options",
            Self::InvalidLocation { .. } => "invalid_location",
            Self::InvalidBody(_) => "invalid_body",
            Self::InvalidHandle(_) => "invalid_handle",
            Self::UnknownBackend(_) => "unknown_backend",
        }
    }

    /// Offending parameters, echoed back to the client.
    pub fn params(&self) -> Option<Value> {
        match self {
            Self::InvalidTarget { target, .. } => Some(serde_json::json!({ "target": target })),
            Self::InvalidResolver { resolver, .. } => {
                Some(serde_json::json!({ "resolver": resolver }))
            }
            Self::InvalidType(t) => Some(serde_json::json!({ "type": t })),
            Self::InvalidOption { field, .. } => Some(serde_json::json!({ "field": field })),
            Self::InvalidLocation { location, .. } => {
                Some(serde_json::json!({ "locations": location }))
            }
            Self::InvalidHandle(h) => Some(serde_json::json!({ "id": h })),
            Self::UnknownBackend(b) => Some(serde_json::json!({ "backend": b })),
            Self::InvalidBody(_) => None,
        }
    }

    fn target(target: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}

/// Raw, caller-supplied request fields prior to validation.
#[derive(Debug, Clone, Default)]
pub struct RawRequest<'a> {
    pub measurement_type: &'a str,
    pub target: &'a str,
    pub options: Option<&'a Value>,
    pub locations: Option<&'a str>,
    pub limit: Option<&'a Value>,
    pub ipv6_capable_only: bool,
}

/// Validate a whole request against a backend profile.
///
/// `allow_ip_literal` is further narrowed by the measurement type.
pub fn validate_request(
    raw: &RawRequest<'_>,
    profile: &BackendProfile,
    allow_ip_literal: bool,
) -> Result<MeasurementRequest, ValidationError> {
    let kind: MeasurementType = raw
        .measurement_type
        .parse()
        .map_err(|_| ValidationError::InvalidType(raw.measurement_type.to_string()))?;

    let target = sanitize_target(kind, raw.target, allow_ip_literal)?;
    let options = sanitize_options(kind, raw.options.unwrap_or(&Value::Null), profile)?;
    let max_probes = profile.max_probes.max(1);
    let probe_count = clamp_number(raw.limit, 1, max_probes, 3u32.min(max_probes));

    Ok(MeasurementRequest {
        target,
        options,
        location_hint: raw.locations.unwrap_or_default().trim().to_string(),
        probe_count,
        ipv6_capable_only: raw.ipv6_capable_only,
    })
}

/// Sanitize a measurement target.
///
/// Returns the canonical form: IP literals re-rendered, hostnames lowercased
/// without a trailing dot.
pub fn sanitize_target(
    kind: MeasurementType,
    target: &str,
    allow_ip_literal: bool,
) -> Result<String, ValidationError> {
    let trimmed = target.trim();
    check_shape(trimmed).map_err(|reason| ValidationError::target(target, reason))?;

    if let Some(ip) = parse_ip_literal(trimmed) {
        if !(allow_ip_literal && kind.allows_ip_target()) {
            debug!(%ip, %kind, "IP literal target refused");
            return Err(ValidationError::target(
                target,
                format!("IP address targets are not allowed for {kind} here"),
            ));
        }
        if is_restricted_ip(ip) {
            debug!(%ip, "Restricted IP target");
            return Err(ValidationError::target(
                target,
                "private, loopback, link-local, multicast or documentation address",
            ));
        }
        return Ok(ip.to_string());
    }

    sanitize_hostname(trimmed, kind == MeasurementType::Dns)
        .map_err(|reason| ValidationError::target(target, reason))
}

/// Sanitize a resolver host. `Ok(None)` means "use the default resolver".
pub fn sanitize_resolver(raw: &str) -> Result<Option<String>, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let invalid = |reason: String| ValidationError::InvalidResolver {
        resolver: raw.to_string(),
        reason,
    };

    check_shape(trimmed).map_err(|r| invalid(r.to_string()))?;

    if let Some(ip) = parse_ip_literal(trimmed) {
        if is_restricted_ip(ip) {
            return Err(invalid(
                "private, loopback, link-local, multicast or documentation address".into(),
            ));
        }
        return Ok(Some(ip.to_string()));
    }

    sanitize_hostname(trimmed, false)
        .map(Some)
        .map_err(|r| invalid(r.to_string()))
}

/// Sanitize the per-type option bag.
pub fn sanitize_options(
    kind: MeasurementType,
    raw: &Value,
    profile: &BackendProfile,
) -> Result<TypeOptions, ValidationError> {
    let max_packets = profile.max_packets.max(1);
    let default_packets = 3u32.min(max_packets);

    let options = match kind {
        MeasurementType::Ping => TypeOptions::Ping(PingOptions {
            packets: clamp_number(field(raw, &["packets"]), 1, max_packets, default_packets),
        }),
        MeasurementType::Traceroute => {
            let protocol = trace_protocol(raw);
            TypeOptions::Traceroute(TracerouteOptions {
                protocol,
                port: trace_port(raw, protocol),
                packets: clamp_number(field(raw, &["packets"]), 1, max_packets, default_packets),
            })
        }
        MeasurementType::Mtr => {
            let protocol = trace_protocol(raw);
            TypeOptions::Mtr(MtrOptions {
                protocol,
                port: trace_port(raw, protocol),
                packets: clamp_number(field(raw, &["packets"]), 1, max_packets, default_packets),
            })
        }
        MeasurementType::Dns => TypeOptions::Dns(DnsOptions {
            query_type: pick(field(raw, &["queryType", "query.type"]), DNS_QUERY_TYPES, "A")
                .to_string(),
            protocol: match pick(field(raw, &["protocol"]), &["UDP", "TCP"], "UDP") {
                "TCP" => DnsProtocol::Tcp,
                _ => DnsProtocol::Udp,
            },
            port: clamp_number(field(raw, &["port"]), 1, 65535, 53) as u16,
            resolver: resolver_field(raw)?,
            trace: flag(field(raw, &["trace"])),
        }),
        MeasurementType::Http => TypeOptions::Http(HttpOptions {
            protocol: match pick(field(raw, &["protocol"]), &["HTTP", "HTTPS"], "HTTPS") {
                "HTTP" => HttpProtocol::Http,
                _ => HttpProtocol::Https,
            },
            method: match pick(
                field(raw, &["method", "request.method"]),
                &["GET", "HEAD", "OPTIONS"],
                "HEAD",
            ) {
                "GET" => HttpMethod::Get,
                "OPTIONS" => HttpMethod::Options,
                _ => HttpMethod::Head,
            },
            path: http_path(field(raw, &["path", "request.path"]))?,
            query: http_query(field(raw, &["query", "request.query"]))?,
            resolver: resolver_field(raw)?,
            port: optional_port(field(raw, &["port"])),
        }),
    };
    Ok(options)
}

/// Whether an address falls in a range that must never be measured.
pub fn is_restricted_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => restricted_v4().iter().any(|net| net.contains(&v4)),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_restricted_ip(IpAddr::V4(mapped));
            }
            restricted_v6().iter().any(|net| net.contains(&v6))
        }
    }
}

/// Measurement handles are opaque provider ids: short, URL-safe tokens.
pub fn sanitize_handle(raw: &str) -> Result<String, ValidationError> {
    let handle = raw.trim();
    let valid = !handle.is_empty()
        && handle.len() <= MAX_HANDLE_LEN
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(handle.to_string())
    } else {
        Err(ValidationError::InvalidHandle(raw.chars().take(MAX_HANDLE_LEN).collect()))
    }
}

fn restricted_v4() -> &'static [Ipv4Net] {
    static NETS: OnceLock<Vec<Ipv4Net>> = OnceLock::new();
    NETS.get_or_init(|| {
        RESTRICTED_V4
            .iter()
            .filter_map(|cidr| match cidr.parse::<IpNet>() {
                Ok(IpNet::V4(net)) => Some(net),
                _ => None,
            })
            .collect()
    })
}

fn restricted_v6() -> &'static [Ipv6Net] {
    static NETS: OnceLock<Vec<Ipv6Net>> = OnceLock::new();
    NETS.get_or_init(|| {
        RESTRICTED_V6
            .iter()
            .filter_map(|cidr| match cidr.parse::<IpNet>() {
                Ok(IpNet::V6(net)) => Some(net),
                _ => None,
            })
            .collect()
    })
}

/// Length and URL-shape checks shared by targets and resolvers.
fn check_shape(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("must not be empty");
    }
    if value.len() > MAX_HOST_LEN {
        return Err("longer than 253 characters");
    }
    if value.contains("://")
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@' | '\\'))
    {
        return Err("must be a bare hostname or IP address, not a URL or path");
    }
    Ok(())
}

fn parse_ip_literal(value: &str) -> Option<IpAddr> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value);
    inner.parse::<IpAddr>().ok()
}

fn sanitize_hostname(value: &str, allow_underscore: bool) -> Result<String, &'static str> {
    let host = value.trim_end_matches('.').to_ascii_lowercase();

    if host.contains(':') {
        return Err("must not include a port");
    }
    if UNSAFE_NAMES.contains(&host.as_str())
        || UNSAFE_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
    {
        return Err("local or internal names are not measurable");
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return Err("must be a fully qualified domain name");
    }
    for label in &labels {
        let valid_chars = label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || (allow_underscore && c == '_'));
        if label.is_empty() || label.len() > 63 || !valid_chars {
            return Err("contains an invalid label");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err("contains an invalid label");
        }
    }
    // "10.1" or "127.1" style shorthand would resolve as an address.
    if labels
        .last()
        .is_some_and(|tld| tld.chars().all(|c| c.is_ascii_digit()))
    {
        return Err("numeric top-level label");
    }

    Ok(host)
}

/// Look up the first present key; dotted keys descend into objects.
fn field<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| {
        key.split('.')
            .try_fold(raw, |node, part| node.get(part))
            .filter(|v| !v.is_null())
    })
}

/// Numeric field clamped to `[min, max]`; `default` when absent or unparseable.
fn clamp_number(value: Option<&Value>, min: u32, max: u32, default: u32) -> u32 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() => (n.trunc().max(min as f64).min(max as f64)) as u32,
        _ => default,
    }
}

fn optional_port(value: Option<&Value>) -> Option<u16> {
    value.map(|v| clamp_number(Some(v), 1, 65535, 80) as u16)
}

/// Upper-case `value` and match it against `allowed`, else `default`.
fn pick<'a>(value: Option<&Value>, allowed: &[&'a str], default: &'a str) -> &'a str {
    let Some(candidate) = value.and_then(Value::as_str) else {
        return default;
    };
    let upper = candidate.trim().to_ascii_uppercase();
    allowed
        .iter()
        .copied()
        .find(|a| *a == upper)
        .unwrap_or(default)
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

fn trace_protocol(raw: &Value) -> TraceProtocol {
    match pick(field(raw, &["protocol"]), &["ICMP", "UDP", "TCP"], "ICMP") {
        "UDP" => TraceProtocol::Udp,
        "TCP" => TraceProtocol::Tcp,
        _ => TraceProtocol::Icmp,
    }
}

fn trace_port(raw: &Value, protocol: TraceProtocol) -> Option<u16> {
    match protocol {
        TraceProtocol::Icmp => None,
        _ => Some(clamp_number(field(raw, &["port"]), 1, 65535, 80) as u16),
    }
}

fn resolver_field(raw: &Value) -> Result<Option<String>, ValidationError> {
    match field(raw, &["resolver"]) {
        None => Ok(None),
        Some(Value::String(s)) => sanitize_resolver(s),
        Some(other) => Err(ValidationError::InvalidResolver {
            resolver: other.to_string(),
            reason: "must be a string".into(),
        }),
    }
}

fn http_text(value: Option<&Value>, field_name: &'static str) -> Result<String, ValidationError> {
    let text = match value {
        None => return Ok(String::new()),
        Some(Value::String(s)) => s.as_str(),
        Some(_) => {
            return Err(ValidationError::InvalidOption {
                field: field_name,
                reason: "must be a string".into(),
            })
        }
    };
    if text.contains('\r') || text.contains('\n') {
        return Err(ValidationError::InvalidOption {
            field: field_name,
            reason: "must not contain CR or LF".into(),
        });
    }
    Ok(text.chars().take(MAX_HTTP_FIELD_LEN).collect())
}

fn http_path(value: Option<&Value>) -> Result<String, ValidationError> {
    let path = http_text(value, "path")?;
    if path.is_empty() {
        return Ok("/".to_string());
    }
    if path.starts_with('/') {
        return Ok(path);
    }
    let mut prefixed = String::with_capacity(path.len() + 1);
    prefixed.push('/');
    prefixed.extend(path.chars().take(MAX_HTTP_FIELD_LEN - 1));
    Ok(prefixed)
}

fn http_query(value: Option<&Value>) -> Result<String, ValidationError> {
    let query = http_text(value, "query")?;
    Ok(query.strip_prefix('?').unwrap_or(&query).to_string())
}
