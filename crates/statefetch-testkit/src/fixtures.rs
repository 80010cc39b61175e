//! Test fixtures and helpers.
//!
//! Common setup code for coordinator and drain tests: a peer pool that
//! journals idle markings, an engine driven by per-root scripts, and a
//! fixture wiring both to a running coordinator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use statefetch_core::{Hash, PeerId, StateRoot};
use statefetch_peerset::{MemoryPeerPool, PeerPool};
use statefetch_sync::{
    RequestTracker, Result, Signal, StatePack, SyncConfig, SyncCoordinator, SyncError,
    TrieSyncEngine,
};
use tokio::sync::mpsc;

/// Deterministic peer id.
pub fn peer(byte: u8) -> PeerId {
    PeerId::from_bytes([byte; 32])
}

/// State root derived from a label.
pub fn root(label: &str) -> StateRoot {
    Hash::digest(label.as_bytes())
}

/// `count` distinct hashes to request.
pub fn hashes(count: usize) -> Vec<Hash> {
    (0..count as u64).map(|i| Hash::digest(&i.to_le_bytes())).collect()
}

/// Install a fmt subscriber writing through the test harness.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Journal
// ─────────────────────────────────────────────────────────────────────────────

/// One observed step, in global order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    EngineStarted(StateRoot),
    EngineFinished(StateRoot),
    /// A scripted engine reserved the peer and issued a request.
    Issued(PeerId),
    /// A scripted engine found the peer busy or gone.
    ReserveRejected(PeerId),
    Idle(PeerId),
}

/// Shared, ordered log of [`JournalEntry`]s.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: JournalEntry) {
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Index of every occurrence of `entry`.
    pub fn positions(&self, entry: &JournalEntry) -> Vec<usize> {
        self.entries
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, e)| *e == entry)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count(&self, entry: &JournalEntry) -> usize {
        self.positions(entry).len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JournaledPool
// ─────────────────────────────────────────────────────────────────────────────

/// A [`MemoryPeerPool`] that also records idle markings in a [`Journal`].
pub struct JournaledPool {
    inner: Arc<MemoryPeerPool>,
    journal: Journal,
}

impl JournaledPool {
    pub fn new(inner: Arc<MemoryPeerPool>, journal: Journal) -> Self {
        Self { inner, journal }
    }

    pub fn inner(&self) -> &Arc<MemoryPeerPool> {
        &self.inner
    }
}

impl PeerPool for JournaledPool {
    fn idle_peers(&self) -> Vec<PeerId> {
        self.inner.idle_peers()
    }

    fn reserve(&self, peer: &PeerId) -> bool {
        self.inner.reserve(peer)
    }

    fn node_data_capacity(&self, peer: &PeerId, target_rtt: Duration) -> usize {
        self.inner.node_data_capacity(peer, target_rtt)
    }

    fn set_node_data_idle(&self, peer: &PeerId, delivered: usize, at: Instant) {
        self.journal.record(JournalEntry::Idle(*peer));
        self.inner.set_node_data_idle(peer, delivered, at);
    }

    fn subscribe_drops(&self, sink: mpsc::UnboundedSender<PeerId>) {
        self.inner.subscribe_drops(sink);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScriptedEngine
// ─────────────────────────────────────────────────────────────────────────────

/// How a scripted sync call ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finish {
    /// Block until cancelled, then return `Cancelled`.
    OnCancel,
    /// Return `Ok` right after issuing.
    Immediately,
    /// Return `EngineFailure` right after issuing.
    Fail(String),
    /// Sleep, then return `EngineFailure`; cancellation is ignored.
    FailAfter(Duration, String),
}

/// What a scripted engine does for one root.
#[derive(Debug, Clone)]
pub struct Script {
    /// Peers to issue one request to, in order.
    pub peers: Vec<PeerId>,
    /// Hashes per request.
    pub items: usize,
    pub finish: Finish,
}

impl Script {
    pub fn new(peers: impl IntoIterator<Item = PeerId>, finish: Finish) -> Self {
        Self {
            peers: peers.into_iter().collect(),
            items: 2,
            finish,
        }
    }
}

impl Default for Script {
    fn default() -> Self {
        Self::new([], Finish::OnCancel)
    }
}

/// A [`TrieSyncEngine`] that follows per-root scripts and journals each call.
pub struct ScriptedEngine {
    scripts: Mutex<HashMap<StateRoot, Script>>,
    journal: Journal,
}

impl ScriptedEngine {
    pub fn new(journal: Journal) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            journal,
        }
    }

    /// Set the script for `root`. Unscripted roots wait for cancellation.
    pub fn script(&self, root: StateRoot, script: Script) {
        self.scripts.lock().insert(root, script);
    }

    async fn run(
        &self,
        script: Script,
        cancel: &Signal,
        requests: &mut RequestTracker,
    ) -> Result<()> {
        for peer in script.peers {
            if requests.pool().reserve(&peer) {
                requests.issue(peer, hashes(script.items));
                self.journal.record(JournalEntry::Issued(peer));
            } else {
                self.journal.record(JournalEntry::ReserveRejected(peer));
            }
        }
        match script.finish {
            Finish::OnCancel => {
                cancel.wait().await;
                Err(SyncError::Cancelled)
            }
            Finish::Immediately => Ok(()),
            Finish::Fail(reason) => Err(SyncError::EngineFailure(reason)),
            Finish::FailAfter(delay, reason) => {
                tokio::time::sleep(delay).await;
                Err(SyncError::EngineFailure(reason))
            }
        }
    }
}

#[async_trait]
impl TrieSyncEngine for ScriptedEngine {
    async fn sync(
        &self,
        root: StateRoot,
        cancel: &Signal,
        requests: &mut RequestTracker,
    ) -> Result<()> {
        let script = self.scripts.lock().get(&root).cloned().unwrap_or_default();
        self.journal.record(JournalEntry::EngineStarted(root));
        let result = self.run(script, cancel, requests).await;
        self.journal.record(JournalEntry::EngineFinished(root));
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CoordinatorFixture
// ─────────────────────────────────────────────────────────────────────────────

/// A running coordinator over a scripted engine and a journaled pool.
pub struct CoordinatorFixture {
    pub pool: Arc<MemoryPeerPool>,
    pub journal: Journal,
    pub engine: Arc<ScriptedEngine>,
    pub coordinator: SyncCoordinator,
    /// Sender side of the tracker's delivery channel.
    pub deliveries: mpsc::Sender<StatePack>,
}

impl CoordinatorFixture {
    /// Connect `peers` and spawn a coordinator. Must run inside a runtime.
    pub fn new(peers: impl IntoIterator<Item = PeerId>, config: SyncConfig) -> Self {
        let pool = Arc::new(MemoryPeerPool::with_peers(peers));
        let journal = Journal::new();
        let journaled = Arc::new(JournaledPool::new(Arc::clone(&pool), journal.clone()));
        let engine = Arc::new(ScriptedEngine::new(journal.clone()));

        let (deliveries, tracker) = RequestTracker::channel(journaled, &config);
        let coordinator = SyncCoordinator::spawn(Arc::clone(&engine), tracker, &config);

        Self {
            pool,
            journal,
            engine,
            coordinator,
            deliveries,
        }
    }

    /// Deliver an empty response from `peer`.
    pub async fn deliver(&self, peer: PeerId) {
        let _ = self
            .deliveries
            .send(StatePack {
                peer,
                nodes: Vec::new(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_positions() {
        let journal = Journal::new();
        journal.record(JournalEntry::Idle(peer(1)));
        journal.record(JournalEntry::Idle(peer(2)));
        journal.record(JournalEntry::Idle(peer(1)));

        assert_eq!(journal.positions(&JournalEntry::Idle(peer(1))), vec![0, 2]);
        assert_eq!(journal.count(&JournalEntry::Idle(peer(2))), 1);
    }

    #[test]
    fn test_journaled_pool_records_idle() {
        let journal = Journal::new();
        let inner = Arc::new(MemoryPeerPool::with_peers([peer(1)]));
        let pool = JournaledPool::new(inner, journal.clone());

        assert!(pool.reserve(&peer(1)));
        pool.set_node_data_idle(&peer(1), 1, Instant::now());

        assert_eq!(journal.entries(), vec![JournalEntry::Idle(peer(1))]);
        assert_eq!(pool.inner().idle_count(&peer(1)), 1);
    }

    #[tokio::test]
    async fn test_scripted_engine_issues_and_finishes() {
        let fixture = CoordinatorFixture::new([peer(1), peer(2)], SyncConfig::default());
        fixture
            .engine
            .script(root("a"), Script::new([peer(1), peer(2)], Finish::Immediately));

        let handle = fixture.coordinator.request_sync(root("a")).await;
        assert_eq!(handle.wait().await, Ok(()));

        assert_eq!(fixture.journal.count(&JournalEntry::Issued(peer(1))), 1);
        assert_eq!(fixture.journal.count(&JournalEntry::Issued(peer(2))), 1);
        assert_eq!(
            fixture.journal.entries().first(),
            Some(&JournalEntry::EngineStarted(root("a")))
        );
    }
}
