//! # Statefetch Core
//!
//! Pure primitives shared by the statefetch crates: trie node hashes,
//! state roots, and peer identities.
//!
//! This crate contains no I/O, no scheduling, no networking.
//!
//! ## Key Types
//!
//! - [`Hash`] - 32-byte content hash of a trie node (Blake3)
//! - [`StateRoot`] - The hash summarizing a full account/storage state
//! - [`PeerId`] - Identifier of a remote peer connection

pub mod peer;
pub mod types;

pub use peer::PeerId;
pub use types::{Hash, StateRoot};
