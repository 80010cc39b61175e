//! Outstanding node-data requests and the events that settle them.
//!
//! The [`RequestTracker`] holds the active request table (at most one
//! request per peer), the list of requests whose response is waiting for
//! processing, and the three event sources that settle requests: state
//! deliveries from the network, peer disconnects from the pool, and
//! per-request timers.
//!
//! The tracker is owned by exactly one task at a time: the engine while a
//! session runs, the coordinator while it drains.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use statefetch_core::{Hash, PeerId};
use statefetch_peerset::PeerPool;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::config::SyncConfig;

/// Identifier of one issued request, unique per tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A node-data response from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePack {
    pub peer: PeerId,
    pub nodes: Vec<Bytes>,
}

/// Payload of an expired request timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout {
    pub peer: PeerId,
    pub id: RequestId,
}

/// One event from the tracker's sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    Delivered(StatePack),
    PeerDropped(PeerId),
    TimedOut(RequestTimeout),
}

impl RequestEvent {
    /// The peer the event concerns.
    pub fn peer(&self) -> &PeerId {
        match self {
            RequestEvent::Delivered(pack) => &pack.peer,
            RequestEvent::PeerDropped(peer) => peer,
            RequestEvent::TimedOut(timeout) => &timeout.peer,
        }
    }

    pub fn idle_reason(&self) -> IdleReason {
        match self {
            RequestEvent::Delivered(_) => IdleReason::Delivered,
            RequestEvent::PeerDropped(_) => IdleReason::PeerDrop,
            RequestEvent::TimedOut(_) => IdleReason::Timeout,
        }
    }
}

/// Why a peer was returned to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdleReason {
    Delivered,
    PeerDrop,
    Timeout,
    /// The response was already handed to processing.
    Finished,
}

impl IdleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdleReason::Delivered => "delivered",
            IdleReason::PeerDrop => "peerdrop",
            IdleReason::Timeout => "timeout",
            IdleReason::Finished => "finished",
        }
    }
}

impl fmt::Display for IdleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outstanding request to one peer.
#[derive(Debug)]
pub struct PeerRequest {
    id: RequestId,
    peer: PeerId,
    hashes: Vec<Hash>,
    issued_at: Instant,
    timer: AbortHandle,
}

impl PeerRequest {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// The trie node hashes asked for.
    pub fn hashes(&self) -> &[Hash] {
        &self.hashes
    }

    /// Number of items asked for.
    pub fn items(&self) -> usize {
        self.hashes.len()
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    fn stop_timer(&self) {
        self.timer.abort();
    }
}

/// How a finished request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Delivered(Vec<Bytes>),
    Dropped,
    TimedOut,
}

/// A request taken out of the active table, waiting for processing.
#[derive(Debug)]
pub struct FinishedRequest {
    pub request: PeerRequest,
    pub outcome: RequestOutcome,
    pub completed_at: Instant,
}

/// Peer ids in the active table and the finished list at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSnapshot {
    /// Sorted.
    pub active: Vec<PeerId>,
    /// In processing order.
    pub finished: Vec<PeerId>,
}

/// Table of outstanding requests plus the sources that settle them.
pub struct RequestTracker {
    pool: Arc<dyn PeerPool>,
    request_timeout: Duration,
    next_id: u64,
    active: HashMap<PeerId, PeerRequest>,
    finished: VecDeque<FinishedRequest>,
    deliveries: mpsc::Receiver<StatePack>,
    drops: mpsc::UnboundedReceiver<PeerId>,
    timeouts: mpsc::UnboundedReceiver<RequestTimeout>,
    timeout_sink: mpsc::UnboundedSender<RequestTimeout>,
}

impl RequestTracker {
    /// Create a tracker fed by the given delivery channel.
    ///
    /// Subscribes to the pool's disconnect notifications.
    pub fn new(
        pool: Arc<dyn PeerPool>,
        deliveries: mpsc::Receiver<StatePack>,
        config: &SyncConfig,
    ) -> Self {
        let (drop_sink, drops) = mpsc::unbounded_channel();
        pool.subscribe_drops(drop_sink);
        let (timeout_sink, timeouts) = mpsc::unbounded_channel();

        Self {
            pool,
            request_timeout: config.request_timeout,
            next_id: 0,
            active: HashMap::new(),
            finished: VecDeque::new(),
            deliveries,
            drops,
            timeouts,
            timeout_sink,
        }
    }

    /// Create a tracker together with the sender the network delivers into.
    pub fn channel(
        pool: Arc<dyn PeerPool>,
        config: &SyncConfig,
    ) -> (mpsc::Sender<StatePack>, Self) {
        let (tx, rx) = mpsc::channel(config.delivery_buffer.max(1));
        (tx, Self::new(pool, rx, config))
    }

    /// The pool idle markings go to.
    pub fn pool(&self) -> &Arc<dyn PeerPool> {
        &self.pool
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Issuing
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a request sent to `peer` and arm its timer.
    ///
    /// A peer can disconnect and reconnect before its previous request times
    /// out. The previous request is then moved to the finished list as
    /// dropped rather than overwritten, so its hashes are not lost.
    pub fn issue(&mut self, peer: PeerId, hashes: Vec<Hash>) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let request = PeerRequest {
            id,
            peer,
            hashes,
            issued_at: Instant::now(),
            timer: self.arm_timer(RequestTimeout { peer, id }),
        };
        tracing::trace!(%peer, %id, items = request.items(), "State request issued");

        if let Some(old) = self.active.insert(peer, request) {
            tracing::warn!(%peer, old = %old.id, "Busy peer assigned new state fetch");
            old.stop_timer();
            self.finished.push_back(FinishedRequest {
                request: old,
                outcome: RequestOutcome::Dropped,
                completed_at: Instant::now(),
            });
        }
        id
    }

    fn arm_timer(&self, timeout: RequestTimeout) -> AbortHandle {
        let sink = self.timeout_sink.clone();
        let ttl = self.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = sink.send(timeout);
        })
        .abort_handle()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Wait for the next delivery, disconnect or timeout.
    ///
    /// Cancel-safe. Returns `None` only if every source is closed.
    pub async fn next_event(&mut self) -> Option<RequestEvent> {
        tokio::select! {
            Some(pack) = self.deliveries.recv() => Some(RequestEvent::Delivered(pack)),
            Some(peer) = self.drops.recv() => Some(RequestEvent::PeerDropped(peer)),
            Some(timeout) = self.timeouts.recv() => Some(RequestEvent::TimedOut(timeout)),
            else => None,
        }
    }

    /// Remove the active request an event settles, stopping its timer.
    ///
    /// Returns `None` for stale or unrelated events: no request from that
    /// peer, or a timeout for a request that was already replaced.
    pub fn take_matching(&mut self, event: &RequestEvent) -> Option<PeerRequest> {
        let peer = event.peer();
        if let RequestEvent::TimedOut(timeout) = event {
            if self.active.get(peer).map(PeerRequest::id) != Some(timeout.id) {
                return None;
            }
        }
        let request = self.active.remove(peer)?;
        request.stop_timer();
        Some(request)
    }

    /// Settle the request an event concerns and queue it for processing.
    ///
    /// Returns false if the event was stale.
    pub fn complete(&mut self, event: RequestEvent) -> bool {
        let Some(request) = self.take_matching(&event) else {
            tracing::debug!(
                peer = %event.peer(),
                reason = %event.idle_reason(),
                "Unrequested state event"
            );
            return false;
        };
        let outcome = match event {
            RequestEvent::Delivered(pack) => RequestOutcome::Delivered(pack.nodes),
            RequestEvent::PeerDropped(_) => RequestOutcome::Dropped,
            RequestEvent::TimedOut(_) => RequestOutcome::TimedOut,
        };
        self.finished.push_back(FinishedRequest {
            request,
            outcome,
            completed_at: Instant::now(),
        });
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accounting
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the request's peer to idle.
    pub fn release(&self, request: &PeerRequest, delivered: usize, at: Instant) {
        self.pool.set_node_data_idle(request.peer(), delivered, at);
    }

    /// Oldest finished request.
    pub fn pop_finished(&mut self) -> Option<FinishedRequest> {
        self.finished.pop_front()
    }

    /// All finished requests, oldest first.
    pub fn take_finished(&mut self) -> Vec<FinishedRequest> {
        self.finished.drain(..).collect()
    }

    /// All active requests, with their timers stopped.
    pub fn take_active(&mut self) -> Vec<PeerRequest> {
        let mut requests: Vec<PeerRequest> = self.active.drain().map(|(_, req)| req).collect();
        requests.sort_by_key(PeerRequest::id);
        for request in &requests {
            request.stop_timer();
        }
        requests
    }

    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn finished_len(&self) -> usize {
        self.finished.len()
    }

    /// Whether `peer` has an outstanding request.
    pub fn is_active(&self, peer: &PeerId) -> bool {
        self.active.contains_key(peer)
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        let mut active: Vec<PeerId> = self.active.keys().copied().collect();
        active.sort();
        RequestSnapshot {
            active,
            finished: self.finished.iter().map(|f| *f.request.peer()).collect(),
        }
    }
}

impl fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTracker")
            .field("active", &self.active.len())
            .field("finished", &self.finished.len())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
