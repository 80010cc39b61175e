//! Sync sessions: one attempt to sync to one state root.
//!
//! A session moves Created → Started → Running → Done. The coordinator
//! creates it, its own task fires `started` and runs the engine, and the
//! engine's result becomes the terminal outcome. The outcome is written
//! before `done` fires, so every waiter reads the same value.

use std::fmt;
use std::sync::{Arc, OnceLock};

use statefetch_core::StateRoot;

use crate::error::{Result, SyncError};
use crate::signal::Signal;

/// Shared state of one sync attempt.
pub struct SyncSession {
    root: StateRoot,
    /// Fired once the session's task begins.
    pub(crate) started: Signal,
    /// Fired to ask the engine to stop.
    pub(crate) cancel: Signal,
    /// Fired once the outcome is fixed.
    pub(crate) done: Signal,
    /// Fired once the supervisor has settled the session's peer accounting.
    pub(crate) settled: Signal,
    outcome: OnceLock<Result<()>>,
}

impl SyncSession {
    pub(crate) fn new(root: StateRoot) -> Self {
        Self {
            root,
            started: Signal::new(),
            cancel: Signal::new(),
            done: Signal::new(),
            settled: Signal::new(),
            outcome: OnceLock::new(),
        }
    }

    /// The state root this session syncs to.
    pub fn root(&self) -> StateRoot {
        self.root
    }

    /// Fix the outcome (first writer wins) and fire `done`.
    pub(crate) fn finish(&self, result: Result<()>) {
        let _ = self.outcome.set(result);
        self.done.fire();
    }

    /// Terminate the session without further peer accounting.
    ///
    /// Used on shutdown: every signal fires so no waiter is left behind.
    pub(crate) fn abort(&self, error: SyncError) {
        self.finish(Err(error));
        self.cancel.fire();
        self.settled.fire();
    }

    /// The terminal outcome, once `done` has fired.
    fn outcome(&self) -> Result<()> {
        self.outcome.get().cloned().unwrap_or(Ok(()))
    }
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSession")
            .field("root", &self.root)
            .field("started", &self.started.is_fired())
            .field("cancelled", &self.cancel.is_fired())
            .field("done", &self.done.is_fired())
            .finish()
    }
}

/// Caller-side handle to a sync session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<SyncSession>,
}

impl SessionHandle {
    pub(crate) fn new(session: Arc<SyncSession>) -> Self {
        Self { session }
    }

    /// The state root this session syncs to.
    pub fn root(&self) -> StateRoot {
        self.session.root()
    }

    /// Whether the session has reached its terminal state.
    pub fn is_done(&self) -> bool {
        self.session.done.is_fired()
    }

    /// Wait until the session is done and return its terminal error.
    pub async fn wait(&self) -> Result<()> {
        self.session.done.wait().await;
        self.session.outcome()
    }

    /// Request early termination and wait for it.
    ///
    /// Idempotent and safe to call concurrently. Returns only after the
    /// coordinator has returned every peer the session used to idle, so a
    /// fresh session can be started right away.
    pub async fn cancel(&self) -> Result<()> {
        self.session.cancel.fire();
        self.session.settled.wait().await;
        self.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statefetch_core::Hash;

    fn session() -> Arc<SyncSession> {
        Arc::new(SyncSession::new(Hash::digest(b"root")))
    }

    #[tokio::test]
    async fn test_wait_returns_stored_outcome() {
        let session = session();
        let handle = SessionHandle::new(Arc::clone(&session));

        session.finish(Err(SyncError::EngineFailure("disk full".into())));

        let first = handle.wait().await;
        let second = handle.wait().await;
        assert_eq!(first, Err(SyncError::EngineFailure("disk full".into())));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_first_outcome_wins() {
        let session = session();
        let handle = SessionHandle::new(Arc::clone(&session));

        session.abort(SyncError::ShutdownRequested);
        session.finish(Ok(()));

        assert_eq!(handle.wait().await, Err(SyncError::ShutdownRequested));
    }

    #[tokio::test]
    async fn test_abort_fires_every_signal() {
        let session = session();
        session.abort(SyncError::ShutdownRequested);

        assert!(session.cancel.is_fired());
        assert!(session.done.is_fired());
        assert!(session.settled.is_fired());

        let handle = SessionHandle::new(session);
        assert!(handle.is_done());
        assert_eq!(handle.cancel().await, Err(SyncError::ShutdownRequested));
    }
}
