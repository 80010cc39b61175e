//! # Statefetch Peerset
//!
//! Peer pool abstraction for statefetch. Provides a trait-based interface
//! over the set of connected peers, with an in-memory implementation.
//!
//! ## Overview
//!
//! State sync only needs a narrow view of the peer set: which peers are
//! idle, a way to claim one for a request, a way to hand it back, and a
//! stream of disconnects. That view is the [`PeerPool`] trait. The
//! networking layer owns the real implementation; [`MemoryPeerPool`] is
//! used by tests and simulations.
//!
//! ## Key Types
//!
//! - [`PeerPool`] - The trait the sync core consumes
//! - [`MemoryPeerPool`] - In-memory pool with an idle-mark journal
//! - [`IdleMark`] - One recorded idle transition
//!
//! ## Design Notes
//!
//! - **Exclusive reservation**: `reserve` flips idle to busy atomically; a
//!   busy peer is never handed out twice.
//! - **Idle marks are journaled**: every `set_node_data_idle` call is
//!   recorded, including for peers that have already disconnected.

pub mod memory;
pub mod traits;

pub use memory::{IdleMark, MemoryPeerPool};
pub use traits::PeerPool;
