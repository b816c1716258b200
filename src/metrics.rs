// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for the gateway.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct GatewayMetrics {
    registry: Registry,
    requests: IntCounterVec,
    rate_limited: IntCounterVec,
    upstream_errors: IntCounterVec,
    poll_seconds: HistogramVec,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("gateway_requests_total", "Requests by endpoint and outcome"),
            &["endpoint", "outcome"],
        )?;
        let rate_limited = IntCounterVec::new(
            Opts::new("gateway_rate_limited_total", "Requests rejected by the rate limiter"),
            &["scope"],
        )?;
        let upstream_errors = IntCounterVec::new(
            Opts::new("gateway_upstream_errors_total", "Provider errors by backend and status"),
            &["backend", "status"],
        )?;
        let poll_seconds = HistogramVec::new(
            HistogramOpts::new("gateway_poll_seconds", "Time spent polling one measurement")
                .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0]),
            &["backend", "reason"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(upstream_errors.clone()))?;
        registry.register(Box::new(poll_seconds.clone()))?;

        Ok(Self {
            registry,
            requests,
            rate_limited,
            upstream_errors,
            poll_seconds,
        })
    }

    pub fn request(&self, endpoint: &str, outcome: &str) {
        self.requests.with_label_values(&[endpoint, outcome]).inc();
    }

    pub fn rate_limited(&self, scope: &str) {
        self.rate_limited.with_label_values(&[scope]).inc();
    }

    pub fn upstream_error(&self, backend: &str, status: u16) {
        self.upstream_errors
            .with_label_values(&[backend, &status.to_string()])
            .inc();
    }

    pub fn poll_duration(&self, backend: &str, reason: &str, seconds: f64) {
        self.poll_seconds
            .with_label_values(&[backend, reason])
            .observe(seconds);
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
