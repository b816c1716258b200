// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Probe-selection resolver.
//!
//! Turns a caller's location hint into an ordered list of provider-neutral
//! [`ProbeSelectionDescriptor`]s. Region labels go through injected lookup
//! tables: region → countries first, region → Atlas area buckets second.
//! Area mapping is coarse and always carries a warning.

use crate::model::{BackendKind, DescriptorKind, ProbeSelectionDescriptor, Selection};
use crate::validator::ValidationError;
use ipnet::IpNet;
use std::collections::HashMap;
use tracing::debug;

/// Atlas connectivity tag required on every dual-stack probe.
pub const TAG_IPV4_WORKS: &str = "system-ipv4-works";
pub const TAG_IPV6_WORKS: &str = "system-ipv6-works";

/// Region lookup data, keyed by lowercased label.
#[derive(Debug, Clone, Default)]
pub struct RegionTables {
    countries: HashMap<String, Vec<String>>,
    areas: HashMap<String, Vec<String>>,
}

impl RegionTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_countries<I, S>(mut self, region: &str, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries.insert(
            normalize_label(region),
            codes.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_areas<I, S>(mut self, region: &str, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.areas.insert(
            normalize_label(region),
            areas.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn countries(&self, region: &str) -> Option<&[String]> {
        self.countries
            .get(&normalize_label(region))
            .map(Vec::as_slice)
            .filter(|c| !c.is_empty())
    }

    pub fn areas(&self, region: &str) -> Option<&[String]> {
        self.areas
            .get(&normalize_label(region))
            .map(Vec::as_slice)
            .filter(|a| !a.is_empty())
    }

    /// UN geoscheme sub-regions (countries ordered by probe density) and
    /// continent-level Atlas areas.
    pub fn builtin() -> Self {
        const COUNTRIES: &[(&str, &[&str])] = &[
            ("western europe", &["DE", "FR", "NL", "BE", "CH", "AT", "LU", "LI", "MC"]),
            ("northern europe", &["GB", "SE", "FI", "NO", "DK", "IE", "EE", "LT", "LV", "IS"]),
            ("southern europe", &["IT", "ES", "PT", "GR", "SI", "HR", "RS", "BG", "MT", "AL", "MK", "BA", "ME"]),
            ("eastern europe", &["PL", "CZ", "RO", "UA", "HU", "SK", "MD", "BY"]),
            ("northern america", &["US", "CA"]),
            ("central america", &["MX", "CR", "PA", "GT", "HN", "SV", "NI", "BZ"]),
            ("caribbean", &["PR", "DO", "JM", "TT", "BS", "BB", "CU", "HT"]),
            ("south america", &["BR", "AR", "CL", "CO", "PE", "EC", "UY", "VE", "PY", "BO"]),
            ("western asia", &["TR", "IL", "AE", "SA", "GE", "AM", "AZ", "CY", "JO", "LB", "QA", "KW", "BH", "OM", "IQ"]),
            ("central asia", &["KZ", "UZ", "KG", "TJ", "TM"]),
            ("southern asia", &["IN", "PK", "BD", "LK", "NP", "IR", "AF", "MV", "BT"]),
            ("eastern asia", &["JP", "KR", "HK", "TW", "CN", "MN", "MO"]),
            ("south-eastern asia", &["SG", "ID", "TH", "VN", "MY", "PH", "KH", "MM", "LA", "BN"]),
            ("northern africa", &["EG", "MA", "TN", "DZ", "LY", "SD"]),
            ("sub-saharan africa", &["ZA", "KE", "NG", "GH", "TZ", "UG", "SN", "RW", "ET", "MU"]),
            ("australia and new zealand", &["AU", "NZ"]),
            ("oceania", &["AU", "NZ", "FJ", "PG", "NC", "PF"]),
        ];
        const AREAS: &[(&str, &[&str])] = &[
            ("europe", &["North-Central", "South-Central"]),
            ("africa", &["South-Central"]),
            ("asia", &["North-East", "South-East"]),
            ("north america", &["West"]),
            ("south america", &["West"]),
            ("americas", &["West"]),
            ("middle east", &["South-Central"]),
            ("asia pacific", &["South-East"]),
        ];

        let tables = COUNTRIES
            .iter()
            .fold(Self::new(), |t, (region, codes)| t.with_countries(region, codes.iter().copied()));
        AREAS
            .iter()
            .fold(tables, |t, (region, areas)| t.with_areas(region, areas.iter().copied()))
    }
}

fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Split `total` across at most `buckets` buckets, remainder to the earliest.
///
/// `distribute(7, 3) == [3, 2, 2]`. Every element is positive and the sum is
/// exactly `total`.
pub fn distribute(total: u32, buckets: usize) -> Vec<u32> {
    let n = (total as usize).min(buckets);
    if n == 0 {
        return Vec::new();
    }
    let base = total / n as u32;
    let remainder = total as usize % n;
    (0..n)
        .map(|i| base + u32::from(i < remainder))
        .collect()
}

/// Parsed shape of a location hint.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Hint {
    World,
    Country(String),
    Asn(u32),
    Prefix(String),
    Ids(Vec<u64>),
    Label(String),
}

fn parse_hint(raw: &str) -> Result<Hint, ValidationError> {
    let hint = raw.trim();
    let invalid = |reason: &str| ValidationError::InvalidLocation {
        location: raw.to_string(),
        reason: reason.to_string(),
    };

    if hint.is_empty() || hint.eq_ignore_ascii_case("world") || hint.eq_ignore_ascii_case("ww") {
        return Ok(Hint::World);
    }

    let lower = hint.to_ascii_lowercase();

    if let Some(list) = lower.strip_prefix("ids:") {
        let ids = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u64>().map_err(|_| invalid("probe ids must be numeric")))
            .collect::<Result<Vec<_>, _>>()?;
        if ids.is_empty() {
            return Err(invalid("empty probe id list"));
        }
        return Ok(Hint::Ids(ids));
    }

    let asn_digits = lower
        .strip_prefix("asn:")
        .or_else(|| lower.strip_prefix("as"))
        .unwrap_or(&lower)
        .trim();
    if !asn_digits.is_empty() && asn_digits.chars().all(|c| c.is_ascii_digit()) {
        let asn = asn_digits
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| invalid("AS number out of range"))?;
        return Ok(Hint::Asn(asn));
    }

    if hint.contains('/') && !hint.contains(char::is_whitespace) {
        let net: IpNet = hint.parse().map_err(|_| invalid("malformed address prefix"))?;
        return Ok(Hint::Prefix(net.trunc().to_string()));
    }

    if hint.len() == 2 && hint.chars().all(|c| c.is_ascii_alphabetic()) {
        return Ok(Hint::Country(hint.to_ascii_uppercase()));
    }

    Ok(Hint::Label(hint.to_string()))
}

/// Resolves location hints into descriptors for one backend.
#[derive(Debug, Clone)]
pub struct SelectionResolver {
    tables: RegionTables,
    max_explicit_ids: usize,
}

impl SelectionResolver {
    pub fn new(tables: RegionTables, max_explicit_ids: usize) -> Self {
        Self {
            tables,
            max_explicit_ids: max_explicit_ids.max(1),
        }
    }

    /// Resolve `hint` into descriptors whose counts sum to `requested`.
    ///
    /// For Atlas every descriptor carries the IPv4 connectivity tag, plus the
    /// IPv6 tag when `ipv6_capable_only` is set.
    pub fn resolve(
        &self,
        hint: &str,
        requested: u32,
        backend: BackendKind,
        ipv6_capable_only: bool,
    ) -> Result<Selection, ValidationError> {
        let requested = requested.max(1);
        let mut warnings = Vec::new();

        let mut descriptors = match parse_hint(hint)? {
            Hint::World => vec![ProbeSelectionDescriptor::worldwide(requested)],
            Hint::Country(code) => {
                vec![ProbeSelectionDescriptor::new(DescriptorKind::Country, code, requested)]
            }
            Hint::Asn(asn) => {
                vec![ProbeSelectionDescriptor::new(DescriptorKind::Asn, asn.to_string(), requested)]
            }
            Hint::Prefix(prefix) => {
                vec![ProbeSelectionDescriptor::new(DescriptorKind::Prefix, prefix, requested)]
            }
            Hint::Ids(ids) => {
                let (descriptor, warning) = self.explicit_ids(&ids);
                warnings.extend(warning);
                vec![descriptor]
            }
            Hint::Label(label) => self.resolve_label(&label, requested, backend, &mut warnings),
        };

        if backend == BackendKind::Atlas {
            let mut tags = vec![TAG_IPV4_WORKS.to_string()];
            if ipv6_capable_only {
                tags.push(TAG_IPV6_WORKS.to_string());
            } else {
                warnings.push(
                    "Probes are not restricted to IPv6-capable hosts; IPv6 coverage may be reduced"
                        .to_string(),
                );
            }
            for descriptor in &mut descriptors {
                descriptor.tags_include = tags.clone();
            }
        }

        debug!(
            hint,
            %backend,
            descriptors = descriptors.len(),
            warnings = warnings.len(),
            "Resolved probe selection"
        );

        Ok(Selection {
            descriptors,
            warnings,
        })
    }

    /// Explicit-id descriptor capped at the configured list size.
    pub fn explicit_ids(&self, ids: &[u64]) -> (ProbeSelectionDescriptor, Option<String>) {
        explicit_id_descriptor(ids, self.max_explicit_ids)
    }

    fn resolve_label(
        &self,
        label: &str,
        requested: u32,
        backend: BackendKind,
        warnings: &mut Vec<String>,
    ) -> Vec<ProbeSelectionDescriptor> {
        if let Some(countries) = self.tables.countries(label) {
            return spread(DescriptorKind::Country, countries, requested);
        }

        if let Some(areas) = self.tables.areas(label) {
            return match backend {
                BackendKind::Atlas => {
                    warnings.push(format!(
                        "Region {label:?} mapped to coarse Atlas areas; selection is approximate"
                    ));
                    spread(DescriptorKind::Area, areas, requested)
                }
                // Globalping understands region and continent names natively.
                BackendKind::Globalping => vec![ProbeSelectionDescriptor::new(
                    DescriptorKind::Area,
                    label,
                    requested,
                )],
            };
        }

        warnings.push(format!(
            "Unknown location {label:?}; falling back to worldwide probes"
        ));
        vec![ProbeSelectionDescriptor::worldwide(requested)]
    }
}

fn spread(kind: DescriptorKind, values: &[String], requested: u32) -> Vec<ProbeSelectionDescriptor> {
    distribute(requested, values.len())
        .into_iter()
        .zip(values)
        .map(|(count, value)| ProbeSelectionDescriptor::new(kind, value.clone(), count))
        .collect()
}

/// Deduplicate `ids` and cap them at `cap`, warning when truncated.
pub fn explicit_id_descriptor(ids: &[u64], cap: usize) -> (ProbeSelectionDescriptor, Option<String>) {
    let cap = cap.max(1);
    let mut unique: Vec<u64> = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(id) {
            unique.push(*id);
        }
    }
    let warning = (unique.len() > cap)
        .then(|| format!("Probe list truncated from {} to {} ids", unique.len(), cap));
    unique.truncate(cap);

    let value = unique
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    (
        ProbeSelectionDescriptor::new(DescriptorKind::ExplicitIds, value, unique.len() as u32),
        warning,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> SelectionResolver {
        SelectionResolver::new(RegionTables::builtin(), 50)
    }

    #[test]
    fn test_distribute() {
        assert_eq!(distribute(7, 3), vec![3, 2, 2]);
        assert_eq!(distribute(5, 9), vec![1, 1, 1, 1, 1]);
        assert_eq!(distribute(10, 1), vec![10]);
        assert!(distribute(0, 3).is_empty());
        assert!(distribute(3, 0).is_empty());
    }

    #[test]
    fn test_distribute_properties() {
        for total in 0..60u32 {
            for buckets in 0..12usize {
                let parts = distribute(total, buckets);
                assert_eq!(parts.iter().sum::<u32>(), if buckets == 0 { 0 } else { total });
                assert!(parts.len() <= buckets);
                assert!(parts.iter().all(|p| *p > 0));
                assert!(parts.windows(2).all(|w| w[0] >= w[1]));
            }
        }
    }

    #[test]
    fn test_world_and_empty() {
        for hint in ["", "  ", "World", "ww"] {
            let sel = resolver()
                .resolve(hint, 4, BackendKind::Globalping, false)
                .unwrap();
            assert_eq!(sel.descriptors, vec![ProbeSelectionDescriptor::worldwide(4)]);
            assert!(sel.warnings.is_empty());
        }
    }

    #[test]
    fn test_country_code() {
        let sel = resolver().resolve("de", 3, BackendKind::Globalping, false).unwrap();
        assert_eq!(
            sel.descriptors,
            vec![ProbeSelectionDescriptor::new(DescriptorKind::Country, "DE", 3)]
        );
    }

    #[test]
    fn test_asn_forms() {
        for hint in ["3320", "AS3320", "asn:3320", "As 3320"] {
            let sel = resolver().resolve(hint, 2, BackendKind::Globalping, false).unwrap();
            assert_eq!(
                sel.descriptors,
                vec![ProbeSelectionDescriptor::new(DescriptorKind::Asn, "3320", 2)],
                "{hint}"
            );
        }
        assert!(resolver().resolve("AS0", 2, BackendKind::Globalping, false).is_err());
    }

    #[test]
    fn test_prefix() {
        let sel = resolver()
            .resolve("193.0.0.1/16", 2, BackendKind::Atlas, true)
            .unwrap();
        assert_eq!(sel.descriptors[0].kind, DescriptorKind::Prefix);
        assert_eq!(sel.descriptors[0].value, "193.0.0.0/16");
        assert_eq!(
            resolver()
                .resolve("not/a-prefix", 2, BackendKind::Atlas, true)
                .unwrap_err()
                .code(),
            "invalid_location"
        );
    }

    #[test]
    fn test_explicit_ids_sized_to_list() {
        let sel = resolver()
            .resolve("ids:10,20,20,30", 99, BackendKind::Atlas, true)
            .unwrap();
        assert_eq!(sel.descriptors.len(), 1);
        assert_eq!(sel.descriptors[0].kind, DescriptorKind::ExplicitIds);
        assert_eq!(sel.descriptors[0].value, "10,20,30");
        assert_eq!(sel.descriptors[0].requested_count, 3);
        assert!(resolver().resolve("ids:1,x", 1, BackendKind::Atlas, true).is_err());
    }

    #[test]
    fn test_explicit_ids_truncated() {
        let ids: Vec<u64> = (1..=60).collect();
        let (descriptor, warning) = resolver().explicit_ids(&ids);
        assert_eq!(descriptor.requested_count, 50);
        assert_eq!(descriptor.explicit_ids().len(), 50);
        assert!(warning.unwrap().contains("truncated"));
    }

    #[test]
    fn test_region_to_countries() {
        let sel = resolver()
            .resolve("Western Europe", 5, BackendKind::Globalping, false)
            .unwrap();
        assert_eq!(sel.total_requested(), 5);
        assert_eq!(sel.descriptors.len(), 5);
        assert!(sel
            .descriptors
            .iter()
            .all(|d| d.kind == DescriptorKind::Country && d.requested_count == 1));
        assert!(sel.warnings.is_empty());
    }

    #[test]
    fn test_region_to_areas_warns_on_atlas() {
        let sel = resolver().resolve("asia", 7, BackendKind::Atlas, true).unwrap();
        assert_eq!(sel.descriptors.len(), 2);
        assert_eq!(sel.descriptors[0].value, "North-East");
        assert_eq!(sel.descriptors[0].requested_count, 4);
        assert_eq!(sel.descriptors[1].requested_count, 3);
        assert!(sel.warnings.iter().any(|w| w.contains("approximate")));
    }

    #[test]
    fn test_region_passthrough_on_globalping() {
        let sel = resolver().resolve("Europe", 4, BackendKind::Globalping, false).unwrap();
        assert_eq!(
            sel.descriptors,
            vec![ProbeSelectionDescriptor::new(DescriptorKind::Area, "Europe", 4)]
        );
    }

    #[test]
    fn test_unknown_label_falls_back_with_warning() {
        let sel = resolver()
            .resolve("Atlantis", 3, BackendKind::Globalping, false)
            .unwrap();
        assert_eq!(sel.descriptors, vec![ProbeSelectionDescriptor::worldwide(3)]);
        assert_eq!(sel.warnings.len(), 1);
    }

    #[test]
    fn test_atlas_connectivity_tags() {
        let sel = resolver().resolve("DE", 3, BackendKind::Atlas, true).unwrap();
        assert_eq!(
            sel.descriptors[0].tags_include,
            vec![TAG_IPV4_WORKS.to_string(), TAG_IPV6_WORKS.to_string()]
        );
        assert!(sel.warnings.is_empty());

        let sel = resolver().resolve("DE", 3, BackendKind::Atlas, false).unwrap();
        assert_eq!(sel.descriptors[0].tags_include, vec![TAG_IPV4_WORKS.to_string()]);
        assert!(sel.warnings[0].contains("IPv6 coverage"));
    }

    #[test]
    fn test_injected_tables() {
        let tables = RegionTables::new().with_countries("Benelux", ["NL", "BE", "LU"]);
        let resolver = SelectionResolver::new(tables, 10);
        let sel = resolver.resolve("benelux", 7, BackendKind::Globalping, false).unwrap();
        let counts: Vec<u32> = sel.descriptors.iter().map(|d| d.requested_count).collect();
        assert_eq!(counts, vec![3, 2, 2]);
    }
}
