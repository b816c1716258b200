// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Probe metadata directory with a TTL cache.
//!
//! Missing entries are fetched in batches, falling back to bounded-concurrency
//! per-id lookups when a batch call fails. Expired entries are served as-is
//! while a background job refreshes them.

use crate::clients::atlas::{AtlasClient, PROBE_BATCH_SIZE};
use crate::clients::UpstreamError;
use crate::model::ProbeInfo;
use crate::tasks::BackgroundQueue;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Source of probe metadata.
#[async_trait]
pub trait ProbeLookup: Send + Sync {
    async fn batch(&self, ids: &[u64], cancel: &CancellationToken) -> Result<Vec<ProbeInfo>, UpstreamError>;

    async fn one(&self, id: u64, cancel: &CancellationToken) -> Result<ProbeInfo, UpstreamError>;
}

#[async_trait]
impl ProbeLookup for AtlasClient {
    async fn batch(&self, ids: &[u64], cancel: &CancellationToken) -> Result<Vec<ProbeInfo>, UpstreamError> {
        Ok(self.probes(ids, cancel).await?.into_iter().map(Into::into).collect())
    }

    async fn one(&self, id: u64, cancel: &CancellationToken) -> Result<ProbeInfo, UpstreamError> {
        Ok(self.probe(id, cancel).await?.into())
    }
}

/// Entries untouched for this many TTLs are dropped by [`ProbeDirectory::sweep`].
const EVICT_AFTER_TTLS: u32 = 4;

struct Entry {
    info: ProbeInfo,
    fetched_at: Instant,
}

struct Inner {
    lookup: Arc<dyn ProbeLookup>,
    cache: RwLock<HashMap<u64, Entry>>,
    ttl: Duration,
    fanout: usize,
}

#[derive(Clone)]
pub struct ProbeDirectory {
    inner: Arc<Inner>,
    queue: BackgroundQueue,
}

impl ProbeDirectory {
    pub fn new(lookup: Arc<dyn ProbeLookup>, ttl: Duration, fanout: usize, queue: BackgroundQueue) -> Self {
        Self {
            inner: Arc::new(Inner {
                lookup,
                cache: RwLock::new(HashMap::new()),
                ttl,
                fanout: fanout.max(1),
            }),
            queue,
        }
    }

    /// Metadata for every id in `ids`. Ids the provider cannot describe map
    /// to a bare [`ProbeInfo`] carrying only the id.
    pub async fn resolve(&self, ids: &[u64], cancel: &CancellationToken) -> HashMap<u64, ProbeInfo> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        let mut stale = Vec::new();

        {
            let cache = self.inner.cache.read().await;
            for id in ids {
                if found.contains_key(id) || missing.contains(id) {
                    continue;
                }
                match cache.get(id) {
                    Some(entry) => {
                        if entry.fetched_at.elapsed() > self.inner.ttl {
                            stale.push(*id);
                        }
                        found.insert(*id, entry.info.clone());
                    }
                    None => missing.push(*id),
                }
            }
        }

        if !stale.is_empty() {
            let inner = self.inner.clone();
            let count = stale.len();
            if self.queue.submit("probe_refresh", async move {
                inner.fetch(&stale, &CancellationToken::new()).await;
            }) {
                debug!(count, "Scheduled probe metadata refresh");
            }
        }

        if !missing.is_empty() {
            found.extend(self.inner.fetch(&missing, cancel).await);
        }

        for id in ids {
            found.entry(*id).or_insert_with(|| ProbeInfo {
                id: id.to_string(),
                ..ProbeInfo::default()
            });
        }
        found
    }

    pub async fn cached(&self) -> usize {
        self.inner.cache.read().await.len()
    }

    /// Drop entries that have gone unrefreshed for several TTLs. Returns the
    /// number removed.
    pub async fn sweep(&self) -> usize {
        let max_age = self.inner.ttl.saturating_mul(EVICT_AFTER_TTLS);
        let mut cache = self.inner.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.fetched_at.elapsed() <= max_age);
        before - cache.len()
    }
}

impl Inner {
    async fn fetch(&self, ids: &[u64], cancel: &CancellationToken) -> HashMap<u64, ProbeInfo> {
        let mut fetched = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(PROBE_BATCH_SIZE) {
            match self.lookup.batch(chunk, cancel).await {
                Ok(infos) => {
                    for info in infos {
                        if let Ok(id) = info.id.parse::<u64>() {
                            fetched.insert(id, info);
                        }
                    }
                }
                Err(UpstreamError::Cancelled) => break,
                Err(e) => {
                    warn!(error = %e, ids = chunk.len(), "Batch probe lookup failed, falling back to per-id");
                    fetched.extend(self.fetch_each(chunk, cancel).await);
                }
            }
        }

        let now = Instant::now();
        let mut cache = self.cache.write().await;
        for (id, info) in &fetched {
            cache.insert(
                *id,
                Entry {
                    info: info.clone(),
                    fetched_at: now,
                },
            );
        }
        fetched
    }

    async fn fetch_each(&self, ids: &[u64], cancel: &CancellationToken) -> Vec<(u64, ProbeInfo)> {
        stream::iter(ids.iter().copied())
            .map(|id| async move { (id, self.lookup.one(id, cancel).await) })
            .buffer_unordered(self.fanout)
            .filter_map(|(id, result)| async move {
                match result {
                    Ok(info) => Some((id, info)),
                    Err(e) => {
                        debug!(id, error = %e, "Probe lookup failed");
                        None
                    }
                }
            })
            .collect()
            .await
    }
}
