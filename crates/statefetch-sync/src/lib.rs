//! # Statefetch Sync
//!
//! State trie sync session coordination.
//!
//! ## Overview
//!
//! A node syncing state follows a moving target: the chain head advances
//! and the root to sync changes with it. This crate runs one sync session
//! at a time and swaps sessions when a new root is requested, without ever
//! losing track of which peers are busy.
//!
//! The moving parts:
//!
//! - [`SyncCoordinator`] - Accepts roots and supervises sessions
//! - [`SessionHandle`] - Caller-side `wait` / `cancel` for one session
//! - [`TrieSyncEngine`] - The pluggable trie download algorithm
//! - [`RequestTracker`] - Outstanding requests and their settling events
//! - [`spindown`] - Settles a finished session's requests
//! - [`TrieFetcher`] - Reference engine over a [`TrieBackend`] and a [`NodeRequester`]
//!
//! ## Peer Accounting
//!
//! Every request reserves a peer. Between sessions the coordinator drains
//! the tracker: it waits for each outstanding request to be delivered, to
//! lose its peer, or to time out, and returns every peer to idle exactly
//! once. Only then does the next session start, so it sees an accurate
//! idle set.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use statefetch_sync::{RequestTracker, SyncConfig, SyncCoordinator};
//!
//! let config = SyncConfig::default();
//! let (deliveries, tracker) = RequestTracker::channel(pool, &config);
//! let coordinator = SyncCoordinator::spawn(engine, tracker, &config);
//!
//! let session = coordinator.request_sync(root).await;
//! session.wait().await?;
//! coordinator.shutdown();
//! ```

pub mod config;
pub mod coordinator;
pub mod drain;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod requests;
pub mod session;
pub mod signal;

pub use config::SyncConfig;
pub use coordinator::SyncCoordinator;
pub use drain::{spindown, DrainReport};
pub use engine::TrieSyncEngine;
pub use error::{Result, SyncError};
pub use fetcher::{NodeRequester, TrieBackend, TrieFetcher, TrieScheduler};
pub use requests::{
    FinishedRequest, IdleReason, PeerRequest, RequestEvent, RequestId, RequestOutcome,
    RequestSnapshot, RequestTimeout, RequestTracker, StatePack,
};
pub use session::{SessionHandle, SyncSession};
pub use signal::Signal;
