//! PeerPool trait: the abstract interface over connected peers.

use std::time::{Duration, Instant};

use statefetch_core::PeerId;
use tokio::sync::mpsc;

/// The PeerPool trait: idle/busy bookkeeping for node-data requests.
///
/// Methods are synchronous; implementations are expected to guard their
/// state with a short-lived lock.
///
/// # Design Notes
///
/// - A peer is either idle or busy. Only `reserve` moves it to busy and
///   only `set_node_data_idle` moves it back.
/// - `set_node_data_idle` doubles as a throughput measurement: the number
///   of delivered items over the time since the reservation.
pub trait PeerPool: Send + Sync {
    /// List the peers currently idle.
    fn idle_peers(&self) -> Vec<PeerId>;

    /// Claim an idle peer for a request.
    ///
    /// Returns false if the peer is unknown or already busy.
    fn reserve(&self, peer: &PeerId) -> bool;

    /// Number of trie nodes the peer is estimated to serve within `target_rtt`.
    fn node_data_capacity(&self, peer: &PeerId, target_rtt: Duration) -> usize;

    /// Return a peer to idle after a node-data request settled.
    ///
    /// # Arguments
    /// - `delivered`: items the request accounted for (0 resets throughput).
    /// - `at`: when the request settled.
    fn set_node_data_idle(&self, peer: &PeerId, delivered: usize, at: Instant);

    /// Register a sink for peer disconnect notifications.
    ///
    /// The sink receives the id of every peer that disconnects afterwards.
    fn subscribe_drops(&self, sink: mpsc::UnboundedSender<PeerId>);
}
