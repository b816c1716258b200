// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Maps provider result rows onto [`ResultRecord`].
//!
//! Both providers end up in the same shape: ping summary statistics,
//! traceroute/MTR hop lists, DNS timing plus answers, HTTP status plus
//! timing. A row carrying an error is reported as failed.

use crate::model::{Hop, MeasurementStatus, MeasurementType, ProbeInfo, ResultPayload, ResultRecord};
use serde_json::Value;
use std::collections::HashMap;

fn number(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64).filter(|n| *n >= 0.0)
}

fn count(value: &Value, key: &str) -> u32 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .map(|n| n.min(u64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}

fn text(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Packet loss in percent; `None` when nothing was sent.
pub fn loss_pct(sent: u32, received: u32) -> Option<f64> {
    (sent > 0).then(|| f64::from(sent.saturating_sub(received)) / f64::from(sent) * 100.0)
}

fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// RIPE Atlas
// ---------------------------------------------------------------------------

/// Distinct probe ids in first-seen order.
pub fn atlas_probe_ids(rows: &[Value]) -> Vec<u64> {
    let mut ids = Vec::new();
    for id in rows.iter().filter_map(|r| r.get("prb_id").and_then(Value::as_u64)) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

pub fn atlas_rows(rows: &[Value], probes: &HashMap<u64, ProbeInfo>) -> Vec<ResultRecord> {
    rows.iter().filter_map(|row| atlas_row(row, probes)).collect()
}

fn atlas_row(row: &Value, probes: &HashMap<u64, ProbeInfo>) -> Option<ResultRecord> {
    let kind: MeasurementType = row.get("type")?.as_str()?.parse().ok()?;
    let probe_id = row.get("prb_id").and_then(Value::as_u64)?;
    let probe = probes.get(&probe_id).cloned().unwrap_or_else(|| ProbeInfo {
        id: probe_id.to_string(),
        ..ProbeInfo::default()
    });

    let mut error = row.get("error").map(error_text);
    let result = match kind {
        MeasurementType::Ping => {
            let sent = count(row, "sent");
            let received = count(row, "rcvd");
            ResultPayload::Ping {
                avg_ms: number(row, "avg"),
                min_ms: number(row, "min"),
                max_ms: number(row, "max"),
                sent,
                received,
                loss_pct: loss_pct(sent, received),
            }
        }
        MeasurementType::Traceroute | MeasurementType::Mtr => ResultPayload::Traceroute {
            hops: atlas_hops(row.get("result")),
        },
        MeasurementType::Dns => {
            let inner = row
                .get("result")
                .or_else(|| {
                    row.get("resultset")
                        .and_then(|set| set.get(0))
                        .and_then(|first| first.get("result"))
                })
                .cloned()
                .unwrap_or(Value::Null);
            if error.is_none() {
                error = row
                    .get("resultset")
                    .and_then(|set| set.get(0))
                    .and_then(|first| first.get("error"))
                    .map(error_text);
            }
            let answers = inner
                .get("answers")
                .cloned()
                .or_else(|| inner.get("abuf").map(|abuf| serde_json::json!({ "abuf": abuf })))
                .unwrap_or(Value::Array(Vec::new()));
            ResultPayload::Dns {
                total_ms: number(&inner, "rt"),
                answers,
            }
        }
        MeasurementType::Http => {
            let first = row
                .get("result")
                .and_then(|r| r.get(0))
                .cloned()
                .unwrap_or(Value::Null);
            if error.is_none() {
                error = first.get("err").map(error_text);
            }
            ResultPayload::Http {
                status_code: first
                    .get("res")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok()),
                total_ms: number(&first, "rt"),
            }
        }
    };

    Some(ResultRecord {
        probe,
        status: if error.is_some() {
            MeasurementStatus::Failed
        } else {
            MeasurementStatus::Finished
        },
        error,
        result,
    })
}

fn atlas_hops(result: Option<&Value>) -> Vec<Hop> {
    let Some(hops) = result.and_then(Value::as_array) else {
        return Vec::new();
    };
    hops.iter()
        .filter_map(|hop| {
            let replies = hop.get("result").and_then(Value::as_array)?;
            let address = replies.iter().find_map(|r| text(r, "from"));
            let rtts: Vec<f64> = replies.iter().filter_map(|r| number(r, "rtt")).collect();
            if address.is_none() && rtts.is_empty() {
                return None;
            }
            Some(Hop {
                hop: count(hop, "hop"),
                address,
                rtts,
                loss_pct: None,
                asn: None,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Globalping
// ---------------------------------------------------------------------------

/// Overall measurement status from a Globalping body.
pub fn globalping_status(body: &Value) -> MeasurementStatus {
    match body.get("status").and_then(Value::as_str) {
        Some("in-progress") | None => MeasurementStatus::InProgress,
        Some("failed") => MeasurementStatus::Failed,
        Some(_) => MeasurementStatus::Finished,
    }
}

pub fn globalping_results(body: &Value) -> Vec<ResultRecord> {
    let Some(kind) = body
        .get("type")
        .and_then(Value::as_str)
        .and_then(|t| t.parse::<MeasurementType>().ok())
    else {
        return Vec::new();
    };
    body.get("results")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().map(|row| globalping_row(kind, row)).collect())
        .unwrap_or_default()
}

fn globalping_probe(probe: &Value) -> ProbeInfo {
    ProbeInfo {
        id: text(probe, "id").unwrap_or_default(),
        city: text(probe, "city"),
        country: text(probe, "country"),
        asn: probe
            .get("asn")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok()),
        network: text(probe, "network"),
        lat: probe.get("latitude").and_then(Value::as_f64),
        lon: probe.get("longitude").and_then(Value::as_f64),
    }
}

fn globalping_row(kind: MeasurementType, row: &Value) -> ResultRecord {
    let probe = row.get("probe").map(globalping_probe).unwrap_or_default();
    let result = row.get("result").cloned().unwrap_or(Value::Null);

    let (status, error) = match result.get("status").and_then(Value::as_str) {
        Some("in-progress") => (MeasurementStatus::InProgress, None),
        Some("failed") | Some("offline") => (
            MeasurementStatus::Failed,
            Some(text(&result, "rawOutput").unwrap_or_else(|| "probe failed".to_string())),
        ),
        _ => (MeasurementStatus::Finished, None),
    };

    let payload = match kind {
        MeasurementType::Ping => {
            let stats = result.get("stats").cloned().unwrap_or(Value::Null);
            let sent = count(&stats, "total");
            let received = count(&stats, "rcv");
            ResultPayload::Ping {
                avg_ms: number(&stats, "avg"),
                min_ms: number(&stats, "min"),
                max_ms: number(&stats, "max"),
                sent,
                received,
                loss_pct: loss_pct(sent, received),
            }
        }
        MeasurementType::Traceroute => ResultPayload::Traceroute {
            hops: globalping_hops(&result, false),
        },
        MeasurementType::Mtr => ResultPayload::Mtr {
            hops: globalping_hops(&result, true),
        },
        MeasurementType::Dns => {
            // Trace mode nests answers per delegation hop; report the last.
            let source = result
                .get("hops")
                .and_then(Value::as_array)
                .and_then(|hops| hops.last())
                .unwrap_or(&result);
            ResultPayload::Dns {
                total_ms: source.get("timings").and_then(|t| number(t, "total")),
                answers: source
                    .get("answers")
                    .cloned()
                    .unwrap_or(Value::Array(Vec::new())),
            }
        }
        MeasurementType::Http => ResultPayload::Http {
            status_code: result
                .get("statusCode")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok()),
            total_ms: result.get("timings").and_then(|t| number(t, "total")),
        },
    };

    ResultRecord {
        probe,
        status,
        error,
        result: payload,
    }
}

fn globalping_hops(result: &Value, with_stats: bool) -> Vec<Hop> {
    let Some(hops) = result.get("hops").and_then(Value::as_array) else {
        return Vec::new();
    };
    hops.iter()
        .enumerate()
        .filter_map(|(index, hop)| {
            let address = text(hop, "resolvedAddress");
            let rtts: Vec<f64> = hop
                .get("timings")
                .and_then(Value::as_array)
                .map(|t| t.iter().filter_map(|r| number(r, "rtt")).collect())
                .unwrap_or_default();
            if address.is_none() && rtts.is_empty() {
                return None;
            }
            let (loss_pct, asn) = if with_stats {
                (
                    hop.get("stats").and_then(|s| number(s, "loss")),
                    hop.get("asn")
                        .and_then(Value::as_array)
                        .and_then(|a| a.first())
                        .and_then(Value::as_u64)
                        .and_then(|n| u32::try_from(n).ok()),
                )
            } else {
                (None, None)
            };
            Some(Hop {
                hop: index as u32 + 1,
                address,
                rtts,
                loss_pct,
                asn,
            })
        })
        .collect()
}
