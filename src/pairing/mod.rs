// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Pairing orchestrator.
//!
//! A pair is an IPv4 and an IPv6 measurement run from the same vantage
//! points. Providers get there differently:
//!
//! - [`AtomicPairing`] submits both definitions in one call (Atlas).
//! - [`SequentialPairing`] creates the first family, then reuses its probe
//!   set for the second by referencing the first measurement (Globalping).
//!
//! Either way the caller gets both handles or an error, never one.

mod atomic;
mod sequential;

pub use atomic::AtomicPairing;
pub use sequential::SequentialPairing;

use crate::error::Result;
use crate::model::{
    AddressFamily, BackendKind, MeasurementPair, MeasurementRequest, PairFlow, Selection,
    SingleMeasurement,
};
use crate::validator::ValidationError;
use async_trait::async_trait;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait PairingStrategy: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Whether creation needs a caller or server credential.
    fn requires_credential(&self) -> bool {
        false
    }

    async fn create_pair(
        &self,
        request: &MeasurementRequest,
        selection: &Selection,
        flow: PairFlow,
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MeasurementPair>;

    /// One measurement of `family`, on the probes used by `reference`.
    async fn create_single(
        &self,
        request: &MeasurementRequest,
        family: AddressFamily,
        reference: &str,
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SingleMeasurement>;
}

/// Check an IP-literal target against the requested family.
///
/// Returns whether the target is a literal. Hostnames always pass.
pub fn literal_matches_family(target: &str, family: AddressFamily) -> std::result::Result<bool, ValidationError> {
    let Ok(ip) = target.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() else {
        return Ok(false);
    };
    if matches!(
        (ip, family),
        (IpAddr::V4(_), AddressFamily::V4) | (IpAddr::V6(_), AddressFamily::V6)
    ) {
        Ok(true)
    } else {
        Err(ValidationError::InvalidTarget {
            target: target.to_string(),
            reason: format!("address family does not match ipVersion {}", family.number()),
        })
    }
}

/// Order two created handles into `(v4, v6)`.
pub(crate) fn by_family(first: AddressFamily, first_id: String, second_id: String) -> (String, String) {
    match first {
        AddressFamily::V4 => (first_id, second_id),
        AddressFamily::V6 => (second_id, first_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_family() {
        assert_eq!(literal_matches_family("example.com", AddressFamily::V6), Ok(false));
        assert_eq!(literal_matches_family("192.0.2.1", AddressFamily::V4), Ok(true));
        assert_eq!(literal_matches_family("2001:db8::1", AddressFamily::V6), Ok(true));
        assert_eq!(
            literal_matches_family("192.0.2.1", AddressFamily::V6)
                .unwrap_err()
                .code(),
            "invalid_target"
        );
    }

    #[test]
    fn test_by_family() {
        assert_eq!(
            by_family(AddressFamily::V4, "a".into(), "b".into()),
            ("a".to_string(), "b".to_string())
        );
        assert_eq!(
            by_family(AddressFamily::V6, "a".into(), "b".into()),
            ("b".to_string(), "a".to_string())
        );
    }
}
