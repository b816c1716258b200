// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the dual-stack measurement gateway.
//!
//! Every measurement endpoint runs the same pipeline: admit the caller
//! through the rate limiter, parse and validate the body, check the backend
//! credential, verify the human-verification token, then hand off to the
//! backend's pairing strategy or poller. Rate-limit headers are attached to
//! every response, success or not.

use crate::clients::{self, AtlasClient, GlobalpingClient};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::limiter::{caller_identity, MemoryCounterStore, RateLimitResult, RateLimiter, UNKNOWN_CALLER};
use crate::metrics::GatewayMetrics;
use crate::model::{
    AddressFamily, BackendKind, MeasurementPair, MeasurementSnapshot, PairFlow, SingleMeasurement,
    StatusReason,
};
use crate::pairing::{AtomicPairing, PairingStrategy, SequentialPairing};
use crate::poller::{CompletionPoller, PollSettings, RevalidatingPoller, SettlePoller};
use crate::probes::ProbeDirectory;
use crate::selection::{RegionTables, SelectionResolver};
use crate::tasks::BackgroundQueue;
use crate::validator::{sanitize_handle, validate_request, RawRequest, ValidationError};
use crate::verification::{HumanVerifier, TurnstileVerifier};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Caller-supplied Atlas API key.
pub const ATLAS_KEY_HEADER: &str = "x-atlas-key";
/// Caller-supplied Globalping token.
pub const GLOBALPING_TOKEN_HEADER: &str = "x-globalping-token";

const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

const SCOPE_PAIR: &str = "pair";
const SCOPE_SINGLE: &str = "single";
const SCOPE_STATUS: &str = "status";

const BACKGROUND_QUEUE_CAPACITY: usize = 256;

/// Pairing strategy and poller for one provider.
pub struct BackendHandle {
    pub pairing: Arc<dyn PairingStrategy>,
    pub poller: Arc<dyn CompletionPoller>,
}

pub struct Backends {
    pub atlas: BackendHandle,
    pub globalping: BackendHandle,
}

impl Backends {
    pub fn get(&self, kind: BackendKind) -> &BackendHandle {
        match kind {
            BackendKind::Atlas => &self.atlas,
            BackendKind::Globalping => &self.globalping,
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub limiter: RateLimiter,
    pub counters: Arc<MemoryCounterStore>,
    pub probes: ProbeDirectory,
    pub resolver: SelectionResolver,
    pub verifier: Arc<dyn HumanVerifier>,
    pub backends: Backends,
    pub metrics: GatewayMetrics,
}

impl AppState {
    /// Wire every component from configuration. Must run inside a Tokio
    /// runtime: the background queue worker is spawned here.
    pub fn from_config(config: Config) -> anyhow::Result<Arc<Self>> {
        let http = clients::http_client(
            Duration::from_secs(config.http_client.timeout_secs),
            &config.http_client.user_agent,
        )?;
        let atlas = AtlasClient::new(&config.backends.atlas.base_url, http.clone())?;
        let globalping = GlobalpingClient::new(&config.backends.globalping.base_url, http.clone())?;

        let (queue, _worker) = BackgroundQueue::start(BACKGROUND_QUEUE_CAPACITY, config.resolver.fanout);
        let probes = ProbeDirectory::new(
            Arc::new(atlas.clone()),
            Duration::from_secs(config.resolver.probe_cache_ttl_secs),
            config.resolver.fanout,
            queue,
        );
        let settings = PollSettings::from(&config.poll);

        let backends = Backends {
            atlas: BackendHandle {
                pairing: Arc::new(AtomicPairing::new(atlas.clone(), config.resolver.max_explicit_ids)),
                poller: Arc::new(SettlePoller::new(atlas, probes.clone(), settings)),
            },
            globalping: BackendHandle {
                pairing: Arc::new(SequentialPairing::new(globalping.clone())),
                poller: Arc::new(RevalidatingPoller::new(globalping, settings)),
            },
        };

        let (limiter, counters) = RateLimiter::in_memory();
        let verifier = Arc::new(TurnstileVerifier::new(http, config.verification.clone()));

        Ok(Arc::new(Self {
            resolver: SelectionResolver::new(RegionTables::builtin(), config.resolver.max_explicit_ids),
            limiter,
            counters,
            probes,
            verifier,
            backends,
            metrics: GatewayMetrics::new()?,
            config,
        }))
    }
}

/// Build the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/measurements-pair", post(create_pair))
        .route("/measurements-pair/:backend", post(create_pair_on))
        .route("/measurements-single", post(create_single))
        .route("/measurements-single/:backend", post(create_single_on))
        .route("/measurements/:id", get(measurement_status));
    if state.config.metrics.enabled {
        let path = state.config.metrics.path.clone();
        router = router.route(&path, get(metrics));
    }
    router.with_state(state)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// `base` block shared by pair and single bodies.
#[derive(Debug, Default, Deserialize)]
pub struct BaseFields {
    #[serde(rename = "type", default)]
    pub measurement_type: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub locations: Option<Value>,
    #[serde(default)]
    pub limit: Option<Value>,
}

impl BaseFields {
    fn locations(&self) -> std::result::Result<Option<&str>, ValidationError> {
        match &self.locations {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(ValidationError::InvalidLocation {
                location: other.to_string(),
                reason: "must be a string".to_string(),
            }),
        }
    }

    fn raw<'a>(
        &'a self,
        options: Option<&'a Value>,
        ipv6_capable_only: bool,
    ) -> std::result::Result<RawRequest<'a>, ValidationError> {
        Ok(RawRequest {
            measurement_type: &self.measurement_type,
            target: &self.target,
            options,
            locations: self.locations()?,
            limit: self.limit.as_ref(),
            ipv6_capable_only,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairBody {
    #[serde(default)]
    pub verification_token: String,
    #[serde(default)]
    pub base: BaseFields,
    #[serde(default)]
    pub measurement_options: Option<Value>,
    #[serde(default)]
    pub flow: PairFlow,
    #[serde(default)]
    pub ipv6_capable_only: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleBody {
    #[serde(default)]
    pub verification_token: String,
    #[serde(default)]
    pub base: BaseFields,
    #[serde(default)]
    pub measurement_options: Option<Value>,
    #[serde(default)]
    pub ip_version: Option<AddressFamily>,
    #[serde(default)]
    pub same_probes_as: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub backend: Option<String>,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "dualstack-gateway",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub async fn create_pair(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    pair(state, None, headers, body).await
}

pub async fn create_pair_on(
    State(state): State<Arc<AppState>>,
    Path(backend): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    pair(state, Some(backend), headers, body).await
}

pub async fn create_single(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    single(state, None, headers, body).await
}

pub async fn create_single_on(
    State(state): State<Arc<AppState>>,
    Path(backend): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    single(state, Some(backend), headers, body).await
}

pub async fn measurement_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StatusQuery>,
    headers: HeaderMap,
) -> Response {
    let caller = caller_identity(&headers);
    let limits = &state.config.rate_limit;
    let admission = state
        .limiter
        .admit(&caller, SCOPE_STATUS, limits.status_limit, limits.window_secs)
        .await;
    if admission.is_limited() {
        return limited(&state, SCOPE_STATUS, admission);
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let result = run_status(&state, query.backend.as_deref(), &id, &headers, &cancel).await;
    respond(&state, SCOPE_STATUS, admission, result)
}

async fn pair(state: Arc<AppState>, backend: Option<String>, headers: HeaderMap, body: Bytes) -> Response {
    let caller = caller_identity(&headers);
    let limits = &state.config.rate_limit;
    let admission = state
        .limiter
        .admit(&caller, SCOPE_PAIR, limits.pair_limit, limits.window_secs)
        .await;
    if admission.is_limited() {
        return limited(&state, SCOPE_PAIR, admission);
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let result = run_pair(&state, backend.as_deref(), &headers, &caller, &body, &cancel).await;
    respond(&state, SCOPE_PAIR, admission, result)
}

async fn single(state: Arc<AppState>, backend: Option<String>, headers: HeaderMap, body: Bytes) -> Response {
    let caller = caller_identity(&headers);
    let limits = &state.config.rate_limit;
    let admission = state
        .limiter
        .admit(&caller, SCOPE_SINGLE, limits.single_limit, limits.window_secs)
        .await;
    if admission.is_limited() {
        return limited(&state, SCOPE_SINGLE, admission);
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let result = run_single(&state, backend.as_deref(), &headers, &caller, &body, &cancel).await;
    respond(&state, SCOPE_SINGLE, admission, result)
}

async fn run_pair(
    state: &AppState,
    backend: Option<&str>,
    headers: &HeaderMap,
    caller: &str,
    body: &[u8],
    cancel: &CancellationToken,
) -> Result<MeasurementPair> {
    let backend = resolve_backend(&state.config, backend)?;
    let body: PairBody = parse_body(body)?;
    let raw = body.base.raw(body.measurement_options.as_ref(), body.ipv6_capable_only)?;
    let request = validate_request(&raw, &state.config.profile(backend), false)?;

    let handle = state.backends.get(backend);
    let credential = credential_for(&state.config, backend, headers);
    if handle.pairing.requires_credential() && credential.is_none() {
        return Err(GatewayError::MissingApiKey {
            backend: backend.as_str(),
        });
    }

    state
        .verifier
        .verify(&body.verification_token, remote_ip(caller), cancel)
        .await?;

    let selection = state.resolver.resolve(
        &request.location_hint,
        request.probe_count,
        backend,
        request.ipv6_capable_only,
    )?;
    debug!(
        %backend,
        kind = %request.measurement_type(),
        probes = selection.total_requested(),
        "Creating measurement pair"
    );

    handle
        .pairing
        .create_pair(&request, &selection, body.flow, credential.as_deref(), cancel)
        .await
}

async fn run_single(
    state: &AppState,
    backend: Option<&str>,
    headers: &HeaderMap,
    caller: &str,
    body: &[u8],
    cancel: &CancellationToken,
) -> Result<SingleMeasurement> {
    let backend = resolve_backend(&state.config, backend)?;
    let body: SingleBody = parse_body(body)?;
    let family = body
        .ip_version
        .ok_or_else(|| ValidationError::InvalidBody("ipVersion is required".to_string()))?;
    let reference = sanitize_handle(body.same_probes_as.as_deref().unwrap_or_default())?;
    let raw = body.base.raw(body.measurement_options.as_ref(), false)?;
    let request = validate_request(&raw, &state.config.profile(backend), true)?;

    let handle = state.backends.get(backend);
    let credential = credential_for(&state.config, backend, headers);
    if handle.pairing.requires_credential() && credential.is_none() {
        return Err(GatewayError::MissingApiKey {
            backend: backend.as_str(),
        });
    }

    state
        .verifier
        .verify(&body.verification_token, remote_ip(caller), cancel)
        .await?;

    handle
        .pairing
        .create_single(&request, family, &reference, credential.as_deref(), cancel)
        .await
}

async fn run_status(
    state: &AppState,
    backend: Option<&str>,
    id: &str,
    headers: &HeaderMap,
    cancel: &CancellationToken,
) -> Result<MeasurementSnapshot> {
    let backend = resolve_backend(&state.config, backend)?;
    let id = sanitize_handle(id)?;
    let credential = credential_for(&state.config, backend, headers);

    let started = Instant::now();
    let snapshot = state
        .backends
        .get(backend)
        .poller
        .poll(&id, credential.as_deref(), cancel)
        .await?;
    state.metrics.poll_duration(
        backend.as_str(),
        snapshot.status_reason.map_or("none", |r: StatusReason| r.as_str()),
        started.elapsed().as_secs_f64(),
    );
    Ok(snapshot)
}

fn resolve_backend(config: &Config, requested: Option<&str>) -> std::result::Result<BackendKind, ValidationError> {
    match requested {
        None => Ok(config.default_backend),
        Some(name) => name
            .parse()
            .map_err(|_| ValidationError::UnknownBackend(name.chars().take(32).collect())),
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> std::result::Result<T, ValidationError> {
    serde_json::from_slice(body).map_err(|e| ValidationError::InvalidBody(e.to_string()))
}

/// Caller credential header, else the server-side default.
fn credential_for(config: &Config, backend: BackendKind, headers: &HeaderMap) -> Option<String> {
    let (name, fallback) = match backend {
        BackendKind::Atlas => (ATLAS_KEY_HEADER, &config.backends.atlas.api_key),
        BackendKind::Globalping => (GLOBALPING_TOKEN_HEADER, &config.backends.globalping.token),
    };
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| fallback.clone())
}

fn remote_ip(caller: &str) -> Option<&str> {
    (caller != UNKNOWN_CALLER).then_some(caller)
}

fn apply_rate_headers(headers: &mut HeaderMap, admission: &RateLimitResult) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(admission.limit()));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(admission.remaining()));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(admission.reset_epoch()));
}

fn limited(state: &AppState, scope: &'static str, admission: RateLimitResult) -> Response {
    state.metrics.rate_limited(scope);
    state.metrics.request(scope, "rate_limited");
    info!(scope, retry_after = ?admission.retry_after(), "Request rate limited");

    let mut response = GatewayError::RateLimited {
        retry_after: admission.retry_after().unwrap_or(1),
    }
    .into_response();
    apply_rate_headers(response.headers_mut(), &admission);
    response
}

fn respond<T: Serialize>(
    state: &AppState,
    endpoint: &'static str,
    admission: RateLimitResult,
    result: Result<T>,
) -> Response {
    let mut response = match result {
        Ok(body) => {
            state.metrics.request(endpoint, "ok");
            (
                StatusCode::OK,
                [(header::CACHE_CONTROL, "no-store")],
                Json(body),
            )
                .into_response()
        }
        Err(e) => {
            state.metrics.request(endpoint, e.code());
            if let GatewayError::Upstream(upstream) = &e {
                state
                    .metrics
                    .upstream_error(upstream.backend(), upstream.status().as_u16());
                warn!(endpoint, error = %e, "Upstream call failed");
            } else {
                debug!(endpoint, code = e.code(), error = %e, "Request rejected");
            }
            e.into_response()
        }
    };
    apply_rate_headers(response.headers_mut(), &admission);
    response
}
