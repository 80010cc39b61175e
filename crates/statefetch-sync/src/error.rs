//! Error types for the sync module.

use thiserror::Error;

/// Errors that can terminate a sync session.
///
/// Errors are cloneable: a session stores its terminal error once and hands
/// a copy to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The coordinator is tearing down.
    #[error("state sync shutdown requested")]
    ShutdownRequested,

    /// The session was terminated before it completed.
    #[error("state sync cancelled")]
    Cancelled,

    /// The trie engine failed.
    #[error("trie engine failure: {0}")]
    EngineFailure(String),

    /// A request was addressed to a peer that is gone.
    ///
    /// Raised by collaborators of the reference fetcher; a session reports
    /// it to waiters wrapped in [`SyncError::EngineFailure`].
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// A delivered trie node could not be decoded or verified.
    ///
    /// Wrapped in [`SyncError::EngineFailure`] like `PeerNotConnected`.
    #[error("invalid trie node: {0}")]
    InvalidNode(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
