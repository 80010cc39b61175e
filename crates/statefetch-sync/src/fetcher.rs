//! Reference trie sync engine: assigns node-data requests to idle peers
//! and feeds responses to a trie scheduler until nothing is missing.
//!
//! The fetcher is the producer side of the request tracker. Each loop
//! iteration processes finished responses in order, hands new work to idle
//! peers, and then waits for the next delivery, disconnect or timeout.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use statefetch_core::{Hash, PeerId, StateRoot};
use tokio::time::MissedTickBehavior;

use crate::config::SyncConfig;
use crate::engine::TrieSyncEngine;
use crate::error::{Result, SyncError};
use crate::requests::{FinishedRequest, RequestOutcome, RequestTracker};
use crate::signal::Signal;

/// Sends node-data requests over the wire.
///
/// Responses come back asynchronously through the tracker's delivery
/// channel as [`StatePack`](crate::StatePack)s.
#[async_trait]
pub trait NodeRequester: Send + Sync + 'static {
    async fn request_node_data(&self, peer: &PeerId, hashes: &[Hash]) -> Result<()>;
}

/// Tracks which trie nodes are still missing for one root.
pub trait TrieScheduler: Send {
    /// Nodes not yet stored, including those currently requested.
    fn pending(&self) -> usize;

    /// Take up to `max` unrequested hashes, marking them requested.
    fn missing(&mut self, max: usize) -> Vec<Hash>;

    /// Verify and store delivered nodes. Returns how many were useful.
    fn process(&mut self, nodes: &[Bytes]) -> Result<usize>;

    /// Return requested hashes that are still missing to the unrequested set.
    fn retry(&mut self, hashes: &[Hash]);

    /// Flush stored nodes to the database.
    fn commit(&mut self) -> Result<()>;
}

/// Creates a scheduler per state root.
pub trait TrieBackend: Send + Sync + 'static {
    fn scheduler(&self, root: StateRoot) -> Box<dyn TrieScheduler>;
}

/// A [`TrieSyncEngine`] built from a backend and a requester.
pub struct TrieFetcher<B, N> {
    backend: B,
    requester: N,
    config: SyncConfig,
}

impl<B: TrieBackend, N: NodeRequester> TrieFetcher<B, N> {
    pub fn new(backend: B, requester: N, config: SyncConfig) -> Self {
        Self {
            backend,
            requester,
            config,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn requester(&self) -> &N {
        &self.requester
    }

    async fn fetch(
        &self,
        scheduler: &mut dyn TrieScheduler,
        cancel: &Signal,
        requests: &mut RequestTracker,
    ) -> Result<()> {
        let mut poll = tokio::time::interval(self.config.idle_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.process_finished(scheduler, cancel, requests)?;
            if scheduler.pending() == 0 {
                return Ok(());
            }
            self.assign(scheduler, requests).await;

            tokio::select! {
                biased;
                _ = cancel.wait() => return Err(SyncError::Cancelled),
                event = requests.next_event() => match event {
                    Some(event) => {
                        requests.complete(event);
                    }
                    None => {
                        return Err(SyncError::EngineFailure(
                            "request event sources closed".into(),
                        ))
                    }
                },
                _ = poll.tick() => {}
            }
        }
    }

    /// Process finished requests oldest first, returning each peer to idle.
    ///
    /// Stops at cancellation; what is left stays queued for the drain.
    fn process_finished(
        &self,
        scheduler: &mut dyn TrieScheduler,
        cancel: &Signal,
        requests: &mut RequestTracker,
    ) -> Result<()> {
        while !cancel.is_fired() {
            let Some(FinishedRequest {
                request,
                outcome,
                completed_at,
            }) = requests.pop_finished()
            else {
                return Ok(());
            };

            let delivered = match outcome {
                RequestOutcome::Delivered(nodes) => {
                    let processed = scheduler.process(&nodes);
                    scheduler.retry(request.hashes());
                    match processed {
                        Ok(useful) => useful,
                        Err(err) => {
                            requests.release(&request, 0, completed_at);
                            return Err(err);
                        }
                    }
                }
                RequestOutcome::Dropped | RequestOutcome::TimedOut => {
                    scheduler.retry(request.hashes());
                    0
                }
            };
            tracing::trace!(
                peer = %request.peer(),
                requested = request.items(),
                delivered,
                "Processed node data response"
            );
            requests.release(&request, delivered, completed_at);
        }
        Err(SyncError::Cancelled)
    }

    /// Hand missing hashes to every idle peer without an outstanding request.
    async fn assign(&self, scheduler: &mut dyn TrieScheduler, requests: &mut RequestTracker) {
        let pool = Arc::clone(requests.pool());
        for peer in pool.idle_peers() {
            if requests.is_active(&peer) {
                continue;
            }
            let capacity = pool
                .node_data_capacity(&peer, self.config.target_rtt)
                .min(self.config.max_items_per_request);
            let hashes = scheduler.missing(capacity);
            if hashes.is_empty() {
                return;
            }
            if !pool.reserve(&peer) {
                scheduler.retry(&hashes);
                continue;
            }
            if let Err(err) = self.requester.request_node_data(&peer, &hashes).await {
                tracing::warn!(%peer, %err, "Node data request failed");
                scheduler.retry(&hashes);
                pool.set_node_data_idle(&peer, 0, Instant::now());
                continue;
            }
            requests.issue(peer, hashes);
        }
    }
}

#[async_trait]
impl<B: TrieBackend, N: NodeRequester> TrieSyncEngine for TrieFetcher<B, N> {
    async fn sync(
        &self,
        root: StateRoot,
        cancel: &Signal,
        requests: &mut RequestTracker,
    ) -> Result<()> {
        let mut scheduler = self.backend.scheduler(root);
        tracing::debug!(%root, pending = scheduler.pending(), "Trie fetch starting");

        let result = self.fetch(scheduler.as_mut(), cancel, requests).await;
        // Commit whatever was stored, even on failure; the first error wins.
        let committed = scheduler.commit();
        result.and(committed).map_err(|err| match err {
            SyncError::Cancelled | SyncError::ShutdownRequested | SyncError::EngineFailure(_) => {
                err
            }
            other => SyncError::EngineFailure(other.to_string()),
        })
    }
}
