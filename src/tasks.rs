// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fire-and-forget background work that must not hold up a response.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Job = (&'static str, Pin<Box<dyn Future<Output = ()> + Send + 'static>>);

/// Bounded queue drained by a single worker that runs jobs with limited
/// concurrency. Submitting never blocks; a full queue drops the job.
#[derive(Clone)]
pub struct BackgroundQueue {
    tx: mpsc::Sender<Job>,
}

impl BackgroundQueue {
    /// Spawn the worker. It exits once every queue handle is dropped.
    pub fn start(capacity: usize, concurrency: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));

        let worker = tokio::spawn(async move {
            while let Some((name, job)) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                tokio::spawn(async move {
                    job.await;
                    debug!(job = name, "Background job finished");
                    drop(permit);
                });
            }
            debug!("Background queue closed");
        });

        (Self { tx }, worker)
    }

    /// Enqueue `job`. Returns `false` if it was dropped.
    pub fn submit<F>(&self, name: &'static str, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.tx.try_send((name, Box::pin(job))) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(job = name, "Background queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(job = name, "Background queue closed, dropping job");
                false
            }
        }
    }
}
