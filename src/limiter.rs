// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixed-window rate limiter for the measurement endpoints.
//!
//! Counters live in external [`CounterStore`]s, keyed `scope:caller`. The
//! read-then-write is not atomic: concurrent bursts from one caller may
//! briefly overshoot the limit. A store failure degrades to admitting the
//! request; the limiter never fails a measurement on its own account.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Identity shared by callers without a usable client-address header.
pub const UNKNOWN_CALLER: &str = "unknown";

/// Client-address headers, most trusted first.
const CLIENT_ADDRESS_HEADERS: &[&str] = &["cf-connecting-ip", "x-real-ip", "x-forwarded-for"];

/// Counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub count: u32,
    /// Unix epoch seconds at which the window ends
    pub reset_epoch: i64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store {store} unavailable: {reason}")]
    Unavailable { store: &'static str, reason: String },
}

/// Shared counter storage with per-key expiry.
///
/// [`MemoryCounterStore`] is local to one process. Running several gateway
/// instances behind a balancer needs an implementation backed by a store
/// they all reach; otherwise each instance enforces its own window and the
/// effective limit multiplies by the instance count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<WindowState>, StoreError>;

    async fn put(&self, key: &str, state: WindowState, ttl_secs: u64) -> Result<(), StoreError>;
}

/// Process-local counter store with TTL expiry.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: RwLock<HashMap<String, (WindowState, i64)>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries whose TTL has passed.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now().timestamp();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, expires)| *expires > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<WindowState>, StoreError> {
        let now = Utc::now().timestamp();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(state, _)| *state))
    }

    async fn put(&self, key: &str, state: WindowState, ttl_secs: u64) -> Result<(), StoreError> {
        let expires = Utc::now().timestamp() + ttl_secs as i64;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (state, expires));
        Ok(())
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed {
        limit: u32,
        /// Remaining requests in current window
        remaining: u32,
        reset_epoch: i64,
    },
    /// Request is rate limited
    Limited {
        limit: u32,
        reset_epoch: i64,
        /// Seconds until the window resets
        retry_after: u64,
    },
}

impl RateLimitResult {
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }

    pub fn limit(&self) -> u32 {
        match self {
            Self::Allowed { limit, .. } | Self::Limited { limit, .. } => *limit,
        }
    }

    pub fn remaining(&self) -> u32 {
        match self {
            Self::Allowed { remaining, .. } => *remaining,
            Self::Limited { .. } => 0,
        }
    }

    pub fn reset_epoch(&self) -> i64 {
        match self {
            Self::Allowed { reset_epoch, .. } | Self::Limited { reset_epoch, .. } => *reset_epoch,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Allowed { .. } => None,
            Self::Limited { retry_after, .. } => Some(*retry_after),
        }
    }
}

/// Fixed-window rate limiter over an ordered list of counter stores.
#[derive(Clone)]
pub struct RateLimiter {
    stores: Vec<Arc<dyn CounterStore>>,
}

impl RateLimiter {
    pub fn new(stores: Vec<Arc<dyn CounterStore>>) -> Self {
        Self { stores }
    }

    /// Limiter over a single in-memory store.
    pub fn in_memory() -> (Self, Arc<MemoryCounterStore>) {
        let store = Arc::new(MemoryCounterStore::new());
        (Self::new(vec![store.clone()]), store)
    }

    /// Admit or reject one request for `caller` in `scope`.
    pub async fn admit(&self, caller: &str, scope: &str, limit: u32, window_secs: u64) -> RateLimitResult {
        self.admit_at(caller, scope, limit, window_secs, Utc::now().timestamp())
            .await
    }

    /// [`admit`](Self::admit) against an explicit clock reading.
    pub async fn admit_at(
        &self,
        caller: &str,
        scope: &str,
        limit: u32,
        window_secs: u64,
        now: i64,
    ) -> RateLimitResult {
        let key = format!("{scope}:{caller}");
        let window_secs = window_secs.max(1);

        let Some((store, current)) = self.read(&key).await else {
            // No store answered: admit without counting.
            return RateLimitResult::Allowed {
                limit,
                remaining: limit,
                reset_epoch: now + window_secs as i64,
            };
        };

        let next = match current {
            Some(state) if state.reset_epoch > now => WindowState {
                count: state.count.saturating_add(1),
                reset_epoch: state.reset_epoch,
            },
            _ => WindowState {
                count: 1,
                reset_epoch: now + window_secs as i64,
            },
        };

        let ttl = (next.reset_epoch - now).max(1) as u64;
        if let Err(e) = store.put(&key, next, ttl).await {
            warn!(store = store.name(), error = %e, "Counter write failed, not counted");
        }

        if next.count > limit {
            let retry_after = (next.reset_epoch - now).max(1) as u64;
            debug!(%key, count = next.count, limit, retry_after, "Rate limit exceeded");
            RateLimitResult::Limited {
                limit,
                reset_epoch: next.reset_epoch,
                retry_after,
            }
        } else {
            RateLimitResult::Allowed {
                limit,
                remaining: limit - next.count,
                reset_epoch: next.reset_epoch,
            }
        }
    }

    /// First store that answers, with what it holds for `key`.
    async fn read(&self, key: &str) -> Option<(&Arc<dyn CounterStore>, Option<WindowState>)> {
        for store in &self.stores {
            match store.get(key).await {
                Ok(state) => return Some((store, state)),
                Err(e) => warn!(store = store.name(), error = %e, "Counter read failed, trying next store"),
            }
        }
        warn!(%key, "No counter store available, admitting unlimited");
        None
    }
}

/// Caller identity from the best available client-address header.
///
/// Callers without one share the [`UNKNOWN_CALLER`] bucket.
pub fn caller_identity(headers: &HeaderMap) -> String {
    for name in CLIENT_ADDRESS_HEADERS {
        let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        // x-forwarded-for: client, proxy1, proxy2
        let first = value.split(',').next().unwrap_or_default().trim();
        if let Ok(ip) = first.parse::<IpAddr>() {
            return ip.to_string();
        }
    }
    UNKNOWN_CALLER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn get(&self, _key: &str) -> Result<Option<WindowState>, StoreError> {
            Err(StoreError::Unavailable {
                store: "failing",
                reason: "offline".into(),
            })
        }

        async fn put(&self, _: &str, _: WindowState, _: u64) -> Result<(), StoreError> {
            Err(StoreError::Unavailable {
                store: "failing",
                reason: "offline".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_limit_plus_one_rejected() {
        let (limiter, _) = RateLimiter::in_memory();
        let now = 1_700_000_000;

        for i in 0..5 {
            let result = limiter.admit_at("203.0.113.9", "pair", 5, 60, now).await;
            assert!(!result.is_limited(), "request {} should be allowed", i + 1);
            assert_eq!(result.remaining(), 4 - i);
        }

        let result = limiter.admit_at("203.0.113.9", "pair", 5, 60, now + 10).await;
        assert!(result.is_limited());
        assert_eq!(result.retry_after(), Some(50));
        assert_eq!(result.reset_epoch(), now + 60);
    }

    #[tokio::test]
    async fn test_fresh_window_after_expiry() {
        let (limiter, _) = RateLimiter::in_memory();
        let now = 1_700_000_000;

        for _ in 0..3 {
            limiter.admit_at("a", "pair", 2, 60, now).await;
        }
        assert!(limiter.admit_at("a", "pair", 2, 60, now).await.is_limited());

        let result = limiter.admit_at("a", "pair", 2, 60, now + 60).await;
        assert_eq!(
            result,
            RateLimitResult::Allowed {
                limit: 2,
                remaining: 1,
                reset_epoch: now + 120,
            }
        );
    }

    #[tokio::test]
    async fn test_scopes_and_callers_independent() {
        let (limiter, _) = RateLimiter::in_memory();
        let now = 1_700_000_000;

        assert!(!limiter.admit_at("a", "pair", 1, 60, now).await.is_limited());
        assert!(limiter.admit_at("a", "pair", 1, 60, now).await.is_limited());
        assert!(!limiter.admit_at("a", "single", 1, 60, now).await.is_limited());
        assert!(!limiter.admit_at("b", "pair", 1, 60, now).await.is_limited());
    }

    #[tokio::test]
    async fn test_count_keeps_growing_while_limited() {
        let (limiter, store) = RateLimiter::in_memory();
        let now = Utc::now().timestamp();

        for _ in 0..4 {
            limiter.admit_at("a", "pair", 1, 60, now).await;
        }
        let state = store.get("pair:a").await.unwrap().unwrap();
        assert_eq!(state.count, 4);
    }

    #[tokio::test]
    async fn test_failed_store_degrades_to_admit() {
        let limiter = RateLimiter::new(vec![Arc::new(FailingStore)]);
        for _ in 0..10 {
            assert!(!limiter.admit("a", "pair", 1, 60).await.is_limited());
        }
    }

    #[tokio::test]
    async fn test_instances_sharing_a_store_share_the_window() {
        let shared = Arc::new(MemoryCounterStore::new());
        let east = RateLimiter::new(vec![shared.clone()]);
        let west = RateLimiter::new(vec![shared.clone()]);
        let now = Utc::now().timestamp();

        assert!(!east.admit_at("a", "pair", 2, 60, now).await.is_limited());
        assert!(!west.admit_at("a", "pair", 2, 60, now).await.is_limited());
        assert!(east.admit_at("a", "pair", 2, 60, now).await.is_limited());
        assert!(west.admit_at("a", "pair", 2, 60, now).await.is_limited());
    }

    #[tokio::test]
    async fn test_falls_through_to_next_store() {
        let memory = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(vec![Arc::new(FailingStore), memory.clone()]);
        let now = Utc::now().timestamp();

        assert!(!limiter.admit_at("a", "pair", 1, 60, now).await.is_limited());
        assert!(limiter.admit_at("a", "pair", 1, 60, now).await.is_limited());
        assert_eq!(memory.len().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_drops_expired() {
        let store = MemoryCounterStore::new();
        store
            .put("k", WindowState { count: 1, reset_epoch: 0 }, 0)
            .await
            .unwrap();
        assert_eq!(store.sweep().await, 1);
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_caller_identity() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller_identity(&headers), UNKNOWN_CALLER);

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.7, 10.0.0.1"),
        );
        assert_eq!(caller_identity(&headers), "198.51.100.7");

        headers.insert("cf-connecting-ip", HeaderValue::from_static("2001:db8::5"));
        assert_eq!(caller_identity(&headers), "2001:db8::5");

        let mut bogus = HeaderMap::new();
        bogus.insert("x-real-ip", HeaderValue::from_static("not-an-ip"));
        assert_eq!(caller_identity(&bogus), UNKNOWN_CALLER);
    }
}
