// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Dual-stack Measurement Gateway Service
//!
//! Creates IPv4/IPv6 measurement pairs on RIPE Atlas or Globalping and
//! serves their normalized results.
//!
//! ## Configuration
//!
//! Defaults, then an optional `gateway.toml`, then `GATEWAY__`-prefixed
//! environment variables (a `.env` file is honoured):
//!
//! - `GATEWAY__BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `GATEWAY__DEFAULT_BACKEND`: `atlas` or `globalping` (default: globalping)
//! - `GATEWAY__BACKENDS__ATLAS__API_KEY`: Server-side Atlas key
//! - `GATEWAY__VERIFICATION__SECRET`: Turnstile secret (required to create measurements)
//! - `GATEWAY__RATE_LIMIT__PAIR_LIMIT`: Pair creations per window (default: 10)

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dualstack_gateway::{router, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::load(Some("gateway"))?;
    info!(
        bind_addr = %config.bind_addr,
        default_backend = %config.default_backend,
        pair_limit = config.rate_limit.pair_limit,
        window_secs = config.rate_limit.window_secs,
        atlas_key = config.backends.atlas.api_key.is_some(),
        verification = config.verification.secret.is_some(),
        "Starting dual-stack measurement gateway"
    );

    let state = AppState::from_config(config.clone())?;

    // Sweep expired rate-limit counters and long-stale probe metadata
    let counters = state.counters.clone();
    let probes = state.probes.clone();
    let sweep_every = config.rate_limit.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            let expired = counters.sweep().await;
            let evicted = probes.sweep().await;
            debug!(expired, evicted, "Swept counters and probe cache");
        }
    });

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
