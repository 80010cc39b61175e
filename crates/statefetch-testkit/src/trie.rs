//! In-memory state trie and simulated peer network.
//!
//! Trie nodes are CBOR-encoded [`TestNode`]s addressed by the Blake3 hash
//! of their encoding. [`MemoryTrie`] is the remote state peers serve;
//! [`MemoryTrieBackend`] is the local database a [`TrieFetcher`] fills;
//! [`MemoryNetwork`] answers node-data requests with per-peer behaviour.
//!
//! [`TrieFetcher`]: statefetch_sync::TrieFetcher

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statefetch_core::{Hash, PeerId, StateRoot};
use statefetch_peerset::MemoryPeerPool;
use statefetch_sync::{
    NodeRequester, Result, StatePack, SyncError, TrieBackend, TrieScheduler,
};
use tokio::sync::mpsc;

/// A trie node: child references plus an opaque value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestNode {
    pub children: Vec<Hash>,
    pub value: Vec<u8>,
}

impl TestNode {
    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = ciborium::into_writer(self, &mut buf);
        Bytes::from(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| SyncError::InvalidNode(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryTrie
// ─────────────────────────────────────────────────────────────────────────────

/// A complete trie held in memory.
#[derive(Debug, Clone)]
pub struct MemoryTrie {
    root: StateRoot,
    nodes: HashMap<Hash, Bytes>,
}

impl MemoryTrie {
    /// Build a random trie of the given depth and fanout from `seed`.
    pub fn generate(seed: u64, depth: usize, fanout: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut nodes = HashMap::new();
        let root = Self::build(&mut rng, &mut nodes, depth, fanout);
        Self { root, nodes }
    }

    fn build(
        rng: &mut StdRng,
        nodes: &mut HashMap<Hash, Bytes>,
        depth: usize,
        fanout: usize,
    ) -> Hash {
        let children = if depth == 0 {
            Vec::new()
        } else {
            (0..fanout)
                .map(|_| Self::build(rng, nodes, depth - 1, fanout))
                .collect()
        };
        let len = rng.gen_range(8..32);
        let node = TestNode {
            children,
            value: (0..len).map(|_| rng.gen()).collect(),
        };
        let encoded = node.encode();
        let hash = Hash::digest(&encoded);
        nodes.insert(hash, encoded);
        hash
    }

    pub fn root(&self) -> StateRoot {
        self.root
    }

    pub fn get(&self, hash: &Hash) -> Option<&Bytes> {
        self.nodes.get(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &Hash> {
        self.nodes.keys()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend and scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Local node database shared by every scheduler it creates.
#[derive(Debug, Clone, Default)]
pub struct MemoryTrieBackend {
    database: Arc<RwLock<HashMap<Hash, Bytes>>>,
}

impl MemoryTrieBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.database.read().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.database.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.database.read().is_empty()
    }
}

impl TrieBackend for MemoryTrieBackend {
    fn scheduler(&self, root: StateRoot) -> Box<dyn TrieScheduler> {
        Box::new(MemoryTrieScheduler::new(Arc::clone(&self.database), root))
    }
}

/// Breadth-first scheduler over a [`MemoryTrieBackend`].
pub struct MemoryTrieScheduler {
    database: Arc<RwLock<HashMap<Hash, Bytes>>>,
    /// Verified nodes not yet committed.
    stored: HashMap<Hash, Bytes>,
    queued: VecDeque<Hash>,
    requested: HashSet<Hash>,
    seen: HashSet<Hash>,
}

impl MemoryTrieScheduler {
    fn new(database: Arc<RwLock<HashMap<Hash, Bytes>>>, root: StateRoot) -> Self {
        let mut scheduler = Self {
            database,
            stored: HashMap::new(),
            queued: VecDeque::new(),
            requested: HashSet::new(),
            seen: HashSet::new(),
        };
        scheduler.schedule(root);
        scheduler
    }

    fn schedule(&mut self, hash: Hash) {
        if !self.seen.insert(hash) || self.database.read().contains_key(&hash) {
            return;
        }
        self.queued.push_back(hash);
    }
}

impl TrieScheduler for MemoryTrieScheduler {
    fn pending(&self) -> usize {
        self.queued.len() + self.requested.len()
    }

    fn missing(&mut self, max: usize) -> Vec<Hash> {
        let take = max.min(self.queued.len());
        let hashes: Vec<Hash> = self.queued.drain(..take).collect();
        self.requested.extend(hashes.iter().copied());
        hashes
    }

    fn process(&mut self, nodes: &[Bytes]) -> Result<usize> {
        let mut useful = 0;
        for blob in nodes {
            let hash = Hash::digest(blob);
            if !self.requested.contains(&hash) {
                continue;
            }
            let node = TestNode::decode(blob)?;
            self.requested.remove(&hash);
            self.stored.insert(hash, blob.clone());
            for child in node.children {
                self.schedule(child);
            }
            useful += 1;
        }
        Ok(useful)
    }

    fn retry(&mut self, hashes: &[Hash]) {
        for hash in hashes {
            if self.requested.remove(hash) {
                self.queued.push_back(*hash);
            }
        }
    }

    fn commit(&mut self) -> Result<()> {
        let mut database = self.database.write();
        database.extend(self.stored.drain());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryNetwork
// ─────────────────────────────────────────────────────────────────────────────

/// How a simulated peer reacts to node-data requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehavior {
    /// Answer with every requested node it has.
    Respond,
    /// Answer after a delay.
    Delay(Duration),
    /// Never answer.
    Silent,
    /// Answer the first `n` requests, then disconnect on the next one.
    DisconnectAfter(usize),
}

/// Simulated peers serving a [`MemoryTrie`].
pub struct MemoryNetwork {
    source: Arc<MemoryTrie>,
    pool: Arc<MemoryPeerPool>,
    deliveries: mpsc::Sender<StatePack>,
    behaviors: Mutex<HashMap<PeerId, PeerBehavior>>,
    served: Mutex<HashMap<PeerId, usize>>,
}

impl MemoryNetwork {
    pub fn new(
        source: Arc<MemoryTrie>,
        pool: Arc<MemoryPeerPool>,
        deliveries: mpsc::Sender<StatePack>,
    ) -> Self {
        Self {
            source,
            pool,
            deliveries,
            behaviors: Mutex::new(HashMap::new()),
            served: Mutex::new(HashMap::new()),
        }
    }

    /// Set a peer's behaviour. Peers default to [`PeerBehavior::Respond`].
    pub fn set_behavior(&self, peer: PeerId, behavior: PeerBehavior) {
        self.behaviors.lock().insert(peer, behavior);
    }

    /// Requests the peer has answered or ignored.
    pub fn served(&self, peer: &PeerId) -> usize {
        self.served.lock().get(peer).copied().unwrap_or_default()
    }

    fn respond(&self, peer: PeerId, hashes: &[Hash], delay: Option<Duration>) {
        let nodes: Vec<Bytes> = hashes
            .iter()
            .filter_map(|hash| self.source.get(hash).cloned())
            .collect();
        let deliveries = self.deliveries.clone();
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let _ = deliveries.send(StatePack { peer, nodes }).await;
        });
    }
}

#[async_trait]
impl NodeRequester for MemoryNetwork {
    async fn request_node_data(&self, peer: &PeerId, hashes: &[Hash]) -> Result<()> {
        if !self.pool.contains(peer) {
            return Err(SyncError::PeerNotConnected(peer.to_hex()));
        }
        let behavior = self
            .behaviors
            .lock()
            .get(peer)
            .copied()
            .unwrap_or(PeerBehavior::Respond);
        let served = {
            let mut served = self.served.lock();
            let count = served.entry(*peer).or_default();
            *count += 1;
            *count
        };

        match behavior {
            PeerBehavior::Respond => self.respond(*peer, hashes, None),
            PeerBehavior::Delay(delay) => self.respond(*peer, hashes, Some(delay)),
            PeerBehavior::Silent => {}
            PeerBehavior::DisconnectAfter(limit) if served <= limit => {
                self.respond(*peer, hashes, None)
            }
            PeerBehavior::DisconnectAfter(_) => {
                self.pool.unregister(peer);
            }
        }
        Ok(())
    }
}
