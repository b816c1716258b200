// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Dual-stack Measurement Gateway
//!
//! Creates paired IPv4/IPv6 network measurements on third-party probe
//! networks and normalizes their results:
//!
//! - Per-caller fixed-window rate limiting with best-effort counter stores
//! - Strict validation of targets, resolvers and per-type options
//! - Location hints resolved into provider probe selections
//! - Atomic (RIPE Atlas) and sequential (Globalping) pairing on one probe set
//! - Settle-detection and ETag revalidation polling
//! - Human verification before any measurement is created

pub mod clients;
pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod pairing;
pub mod poller;
pub mod probes;
pub mod selection;
pub mod tasks;
pub mod validator;
pub mod verification;

pub use config::Config;
pub use error::GatewayError;
pub use handlers::{router, AppState};
pub use limiter::{RateLimitResult, RateLimiter};
pub use validator::ValidationError;
