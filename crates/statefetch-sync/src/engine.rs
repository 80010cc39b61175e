//! The trie sync engine seam.

use async_trait::async_trait;
use statefetch_core::StateRoot;

use crate::error::Result;
use crate::requests::RequestTracker;
use crate::signal::Signal;

/// Downloads and verifies a state trie.
///
/// The coordinator runs one `sync` call per session, in its own task.
///
/// # Contract
///
/// - Every request the engine sends must be recorded with
///   [`RequestTracker::issue`]; requests the engine settles itself must be
///   released through [`RequestTracker::release`].
/// - Whatever is left in the tracker when `sync` returns (active requests,
///   unprocessed finished requests) is drained by the coordinator.
/// - `cancel` is cooperative: the engine should return
///   [`SyncError::Cancelled`](crate::SyncError::Cancelled) soon after it fires.
#[async_trait]
pub trait TrieSyncEngine: Send + Sync + 'static {
    /// Sync the trie rooted at `root`, blocking until done, failed or cancelled.
    async fn sync(
        &self,
        root: StateRoot,
        cancel: &Signal,
        requests: &mut RequestTracker,
    ) -> Result<()>;
}
