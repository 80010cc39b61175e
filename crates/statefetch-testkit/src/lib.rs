//! # Statefetch Testkit
//!
//! Testing utilities for statefetch.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: A journaled peer pool, a scripted sync engine, and a
//!   fixture wiring both to a running coordinator
//! - **Tries**: A generated in-memory trie, a local backend for the
//!   reference fetcher, and simulated peers with configurable behaviour
//! - **Generators**: Proptest strategies for drain scenarios
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use statefetch_testkit::fixtures::{peer, root, CoordinatorFixture, Finish, Script};
//!
//! let fixture = CoordinatorFixture::new([peer(1)], SyncConfig::default());
//! fixture.engine.script(root("a"), Script::new([peer(1)], Finish::OnCancel));
//!
//! let handle = fixture.coordinator.request_sync(root("a")).await;
//! handle.cancel().await;
//! assert_eq!(fixture.pool.idle_count(&peer(1)), 1);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use statefetch_testkit::generators::DrainScript;
//!
//! proptest! {
//!     #[test]
//!     fn every_peer_is_idled_once(script: DrainScript) {
//!         // issue script.requests, settle them in script.order, spindown
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod trie;

pub use fixtures::{
    init_tracing, CoordinatorFixture, Finish, Journal, JournalEntry, JournaledPool, Script,
    ScriptedEngine,
};
pub use generators::{DrainScript, Settle};
pub use trie::{MemoryNetwork, MemoryTrie, MemoryTrieBackend, PeerBehavior, TestNode};
