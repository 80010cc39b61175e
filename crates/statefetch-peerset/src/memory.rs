//! In-memory implementation of the PeerPool trait.
//!
//! This is primarily for testing and simulation. Peers are registered and
//! unregistered by hand; every idle marking is journaled so tests can check
//! accounting.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use statefetch_core::PeerId;
use tokio::sync::mpsc;

use crate::traits::PeerPool;

/// Weight of a new throughput measurement in the moving average.
const MEASUREMENT_IMPACT: f64 = 0.1;

/// A recorded `set_node_data_idle` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleMark {
    pub peer: PeerId,
    pub delivered: usize,
    pub at: Instant,
}

/// In-memory peer pool.
///
/// Thread-safe via RwLock.
pub struct MemoryPeerPool {
    inner: RwLock<MemoryPeerPoolInner>,
}

struct MemoryPeerPoolInner {
    /// Connected peers.
    peers: HashMap<PeerId, PeerSlot>,

    /// Disconnect subscribers.
    drop_sinks: Vec<mpsc::UnboundedSender<PeerId>>,

    /// Every idle marking, in call order.
    idle_marks: Vec<IdleMark>,
}

#[derive(Debug, Default)]
struct PeerSlot {
    /// Set when reserved, cleared when marked idle.
    busy_since: Option<Instant>,

    /// Items per second, exponentially averaged.
    throughput: f64,
}

impl MemoryPeerPool {
    /// Create a new empty pool.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryPeerPoolInner {
                peers: HashMap::new(),
                drop_sinks: Vec::new(),
                idle_marks: Vec::new(),
            }),
        }
    }

    /// Create a pool with the given peers connected and idle.
    pub fn with_peers(peers: impl IntoIterator<Item = PeerId>) -> Self {
        let pool = Self::new();
        for peer in peers {
            pool.register(peer);
        }
        pool
    }

    /// Connect a peer. Re-registering a known peer is a no-op.
    pub fn register(&self, peer: PeerId) {
        let mut inner = self.inner.write();
        inner.peers.entry(peer).or_default();
        tracing::debug!(%peer, "Peer registered");
    }

    /// Disconnect a peer and notify drop subscribers.
    ///
    /// Returns false if the peer was not connected.
    pub fn unregister(&self, peer: &PeerId) -> bool {
        let mut inner = self.inner.write();
        if inner.peers.remove(peer).is_none() {
            return false;
        }
        inner.drop_sinks.retain(|sink| sink.send(*peer).is_ok());
        tracing::debug!(%peer, "Peer unregistered");
        true
    }

    /// Whether the peer is connected.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.inner.read().peers.contains_key(peer)
    }

    /// Whether the peer is connected and idle.
    pub fn is_idle(&self, peer: &PeerId) -> bool {
        self.inner
            .read()
            .peers
            .get(peer)
            .is_some_and(|slot| slot.busy_since.is_none())
    }

    /// Current throughput estimate in items per second.
    pub fn throughput(&self, peer: &PeerId) -> Option<f64> {
        self.inner.read().peers.get(peer).map(|slot| slot.throughput)
    }

    /// All idle markings so far.
    pub fn idle_marks(&self) -> Vec<IdleMark> {
        self.inner.read().idle_marks.clone()
    }

    /// Number of times the peer was marked idle.
    pub fn idle_count(&self, peer: &PeerId) -> usize {
        self.inner
            .read()
            .idle_marks
            .iter()
            .filter(|mark| &mark.peer == peer)
            .count()
    }
}

impl Default for MemoryPeerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerPool for MemoryPeerPool {
    fn idle_peers(&self) -> Vec<PeerId> {
        let inner = self.inner.read();
        let mut idle: Vec<PeerId> = inner
            .peers
            .iter()
            .filter(|(_, slot)| slot.busy_since.is_none())
            .map(|(peer, _)| *peer)
            .collect();
        idle.sort();
        idle
    }

    fn reserve(&self, peer: &PeerId) -> bool {
        let mut inner = self.inner.write();
        match inner.peers.get_mut(peer) {
            Some(slot) if slot.busy_since.is_none() => {
                slot.busy_since = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    fn node_data_capacity(&self, peer: &PeerId, target_rtt: Duration) -> usize {
        let throughput = self.throughput(peer).unwrap_or_default();
        1 + (throughput * target_rtt.as_secs_f64()).max(1.0) as usize
    }

    fn set_node_data_idle(&self, peer: &PeerId, delivered: usize, at: Instant) {
        let mut inner = self.inner.write();
        inner.idle_marks.push(IdleMark {
            peer: *peer,
            delivered,
            at,
        });

        // Disconnected peers are journaled but have no slot to update.
        let Some(slot) = inner.peers.get_mut(peer) else {
            return;
        };
        let Some(started) = slot.busy_since.take() else {
            tracing::warn!(%peer, "Idle peer marked idle again");
            return;
        };
        if delivered == 0 {
            slot.throughput = 0.0;
            return;
        }
        // +1ms keeps the division finite for instant deliveries.
        let elapsed = at.saturating_duration_since(started) + Duration::from_millis(1);
        let measured = delivered as f64 / elapsed.as_secs_f64();
        slot.throughput =
            (1.0 - MEASUREMENT_IMPACT) * slot.throughput + MEASUREMENT_IMPACT * measured;
    }

    fn subscribe_drops(&self, sink: mpsc::UnboundedSender<PeerId>) {
        self.inner.write().drop_sinks.push(sink);
    }
}
