// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the dual-stack measurement gateway.
//!
//! Values are layered: built-in defaults, then an optional `gateway.toml`,
//! then `GATEWAY__`-prefixed environment variables (`__` separates nested
//! sections, e.g. `GATEWAY__RATE_LIMIT__PAIR_LIMIT=5`).

use crate::model::{BackendKind, BackendProfile};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the gateway service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Backend used by the un-suffixed endpoints (default: globalping)
    #[serde(default = "default_backend")]
    pub default_backend: BackendKind,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub backends: BackendsConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub http_client: HttpClientConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Fixed-window limits, one per public scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Pair creations per window per caller (default: 10)
    #[serde(default = "default_pair_limit")]
    pub pair_limit: u32,

    /// Single creations per window per caller (default: 20)
    #[serde(default = "default_single_limit")]
    pub single_limit: u32,

    /// Status polls per window per caller (default: 120)
    #[serde(default = "default_status_limit")]
    pub status_limit: u32,

    /// Window length in seconds (default: 60)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How often expired in-memory counters are swept (default: 60)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub atlas: AtlasConfig,

    #[serde(default)]
    pub globalping: GlobalpingConfig,
}

/// RIPE Atlas connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtlasConfig {
    #[serde(default = "default_atlas_url")]
    pub base_url: String,

    /// Server-side default key, used when the caller supplies none
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_max_probes")]
    pub max_probes: u32,

    #[serde(default = "default_atlas_max_packets")]
    pub max_packets: u32,
}

/// Globalping connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalpingConfig {
    #[serde(default = "default_globalping_url")]
    pub base_url: String,

    /// Optional bearer token; raises the provider's own rate limits
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_max_probes")]
    pub max_probes: u32,

    #[serde(default = "default_globalping_max_packets")]
    pub max_packets: u32,
}

/// Human-verification (Turnstile) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_verify_url")]
    pub verify_url: String,

    #[serde(default)]
    pub secret: Option<String>,

    /// Expected widget action, checked when set
    #[serde(default)]
    pub expected_action: Option<String>,

    /// Accepted hostnames; empty accepts any
    #[serde(default)]
    pub expected_hostnames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Consecutive polls with an unchanged result count before a
    /// measurement is considered settled (default: 2)
    #[serde(default = "default_settle_polls")]
    pub settle_polls: u32,

    /// Wall-clock budget for one status request (default: 60)
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Cap on explicit probe-id lists (default: 50)
    #[serde(default = "default_max_explicit_ids")]
    pub max_explicit_ids: usize,

    /// Concurrent upstream calls when resolving probe metadata (default: 8)
    #[serde(default = "default_fanout")]
    pub fanout: usize,

    /// Probe metadata cache TTL in seconds (default: 3600)
    #[serde(default = "default_probe_cache_ttl_secs")]
    pub probe_cache_ttl_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_backend() -> BackendKind {
    BackendKind::Globalping
}

fn default_pair_limit() -> u32 {
    10
}

fn default_single_limit() -> u32 {
    20
}

fn default_status_limit() -> u32 {
    120
}

fn default_window_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_atlas_url() -> String {
    "https://atlas.ripe.net".to_string()
}

fn default_globalping_url() -> String {
    "https://api.globalping.io".to_string()
}

fn default_max_probes() -> u32 {
    50
}

fn default_atlas_max_packets() -> u32 {
    16
}

fn default_globalping_max_packets() -> u32 {
    10
}

fn default_verify_url() -> String {
    "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string()
}

fn default_settle_polls() -> u32 {
    2
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("dualstack-gateway/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_explicit_ids() -> usize {
    50
}

fn default_fanout() -> usize {
    8
}

fn default_probe_cache_ttl_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            default_backend: default_backend(),
            rate_limit: RateLimitConfig::default(),
            backends: BackendsConfig::default(),
            verification: VerificationConfig::default(),
            poll: PollConfig::default(),
            http_client: HttpClientConfig::default(),
            resolver: ResolverConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            pair_limit: default_pair_limit(),
            single_limit: default_single_limit(),
            status_limit: default_status_limit(),
            window_secs: default_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            base_url: default_atlas_url(),
            api_key: None,
            max_probes: default_max_probes(),
            max_packets: default_atlas_max_packets(),
        }
    }
}

impl Default for GlobalpingConfig {
    fn default() -> Self {
        Self {
            base_url: default_globalping_url(),
            token: None,
            max_probes: default_max_probes(),
            max_packets: default_globalping_max_packets(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            verify_url: default_verify_url(),
            secret: None,
            expected_action: None,
            expected_hostnames: Vec::new(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            settle_polls: default_settle_polls(),
            timeout_secs: default_poll_timeout_secs(),
            interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_explicit_ids: default_max_explicit_ids(),
            fanout: default_fanout(),
            probe_cache_ttl_secs: default_probe_cache_ttl_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("verification.expected_hostnames")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Limits enforced by the validator for the given backend.
    pub fn profile(&self, backend: BackendKind) -> BackendProfile {
        match backend {
            BackendKind::Atlas => BackendProfile {
                backend,
                max_probes: self.backends.atlas.max_probes,
                max_packets: self.backends.atlas.max_packets,
            },
            BackendKind::Globalping => BackendProfile {
                backend,
                max_probes: self.backends.globalping.max_probes,
                max_packets: self.backends.globalping.max_packets,
            },
        }
    }
}

impl RateLimitConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl PollConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
