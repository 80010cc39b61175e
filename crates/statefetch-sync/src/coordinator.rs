//! The sync coordinator: a single supervisor task that owns "which session
//! is current".
//!
//! Callers submit roots with [`SyncCoordinator::request_sync`]. The
//! supervisor runs one session at a time and, on every exit path of a
//! session (replacement, completion), drains the session's outstanding
//! requests before anything else happens. A replacement session therefore
//! never issues a request while its predecessor still has one in flight.
//!
//! ```text
//!   request_sync(root) ──► queue ──► supervisor ──spawn──► session task
//!                                       │                   (engine.sync)
//!                  ┌────────────────────┼────────────────────┐
//!             new root             session done           shutdown
//!                  │                    │                    │
//!        cancel, join, drain      join, drain         abort, stop
//!                  │                    │
//!        start next session       wait for next root
//! ```

use std::sync::Arc;

use statefetch_core::StateRoot;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::drain::spindown;
use crate::engine::TrieSyncEngine;
use crate::error::SyncError;
use crate::requests::RequestTracker;
use crate::session::{SessionHandle, SyncSession};
use crate::signal::Signal;

/// Front end of the supervisor task. Construct once per node.
#[derive(Debug)]
pub struct SyncCoordinator {
    requests: mpsc::Sender<Arc<SyncSession>>,
    shutdown: Arc<Signal>,
    closed: Arc<Signal>,
}

impl SyncCoordinator {
    /// Start the supervisor task.
    ///
    /// The tracker is lent to each session's engine call and drained by the
    /// supervisor in between.
    pub fn spawn<E: TrieSyncEngine>(
        engine: Arc<E>,
        tracker: RequestTracker,
        config: &SyncConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.request_queue.max(1));
        let shutdown = Arc::new(Signal::new());
        let closed = Arc::new(Signal::new());

        let supervisor = Supervisor {
            engine,
            requests: rx,
            shutdown: Arc::clone(&shutdown),
            closed: Arc::clone(&closed),
            tracker: Some(tracker),
        };
        tokio::spawn(supervisor.run());

        Self {
            requests: tx,
            shutdown,
            closed,
        }
    }

    /// Start syncing to `root`, replacing whatever session is running.
    ///
    /// Returns once the new session has started, which is after the
    /// previous session was drained. If the coordinator is shutting down
    /// the returned handle is already done with `ShutdownRequested`.
    pub async fn request_sync(&self, root: StateRoot) -> SessionHandle {
        let session = Arc::new(SyncSession::new(root));
        let handle = SessionHandle::new(Arc::clone(&session));

        if self.shutdown.is_fired() || self.closed.is_fired() {
            session.abort(SyncError::ShutdownRequested);
            return handle;
        }

        let queued = tokio::select! {
            biased;
            _ = self.shutdown.wait() => false,
            _ = self.closed.wait() => false,
            sent = self.requests.send(Arc::clone(&session)) => sent.is_ok(),
        };
        if !queued {
            session.abort(SyncError::ShutdownRequested);
            return handle;
        }

        tokio::select! {
            biased;
            _ = session.started.wait() => {}
            _ = session.done.wait() => {}
            _ = self.closed.wait() => session.abort(SyncError::ShutdownRequested),
        }
        handle
    }

    /// Trigger shutdown. Running and queued sessions end with
    /// `ShutdownRequested`.
    pub fn shutdown(&self) {
        if self.shutdown.fire() {
            tracing::debug!("State sync coordinator shutting down");
        }
    }

    /// Whether the supervisor task has exited.
    pub fn is_stopped(&self) -> bool {
        self.closed.is_fired()
    }

    /// Wait until the supervisor task has exited.
    pub async fn stopped(&self) {
        self.closed.wait().await;
    }
}

impl Drop for SyncCoordinator {
    // Nothing can reach the supervisor once its front end is gone.
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Transition {
    /// A newer root arrived; run it next.
    Replace(Arc<SyncSession>),
    /// The session finished on its own.
    Completed,
    Stop,
}

struct Supervisor<E> {
    engine: Arc<E>,
    requests: mpsc::Receiver<Arc<SyncSession>>,
    shutdown: Arc<Signal>,
    closed: Arc<Signal>,
    /// Present whenever no session task holds it.
    tracker: Option<RequestTracker>,
}

impl<E: TrieSyncEngine> Supervisor<E> {
    async fn run(mut self) {
        let mut next: Option<Arc<SyncSession>> = None;
        loop {
            if self.shutdown.is_fired() {
                if let Some(session) = next.take() {
                    session.abort(SyncError::ShutdownRequested);
                }
                break;
            }
            let session = match next.take() {
                Some(session) => session,
                None => tokio::select! {
                    biased;
                    _ = self.shutdown.wait() => break,
                    session = self.requests.recv() => match session {
                        Some(session) => session,
                        None => break,
                    },
                },
            };
            match self.run_session(session).await {
                Transition::Replace(session) => next = Some(session),
                Transition::Completed => {}
                Transition::Stop => break,
            }
        }
        self.reject_queued();
        tracing::debug!("State sync coordinator stopped");
    }

    async fn run_session(&mut self, session: Arc<SyncSession>) -> Transition {
        let Some(tracker) = self.tracker.take() else {
            session.abort(SyncError::ShutdownRequested);
            return Transition::Stop;
        };
        let root = session.root();
        tracing::debug!(%root, "State sync starting");

        let _cancel = CancelOnDrop(Arc::clone(&session));
        let task = tokio::spawn(execute(
            Arc::clone(&self.engine),
            Arc::clone(&session),
            tracker,
        ));

        let next = tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                tracing::debug!(%root, "State sync interrupted by shutdown");
                session.abort(SyncError::ShutdownRequested);
                return Transition::Stop;
            }
            Some(next) = self.requests.recv() => {
                tracing::debug!(%root, next = %next.root(), "State sync switching root");
                Some(next)
            }
            _ = session.done.wait() => None,
        };

        session.cancel.fire();
        if !self.retire(&session, task).await {
            if let Some(next) = next {
                next.abort(SyncError::ShutdownRequested);
            }
            return Transition::Stop;
        }

        match next {
            Some(next) => Transition::Replace(next),
            None => Transition::Completed,
        }
    }

    /// Wait for the session's task to hand the tracker back, then drain it.
    ///
    /// Returns false if shutdown or a task failure interrupted retirement.
    async fn retire(
        &mut self,
        session: &SyncSession,
        mut task: JoinHandle<RequestTracker>,
    ) -> bool {
        let root = session.root();
        let joined = tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                session.abort(SyncError::ShutdownRequested);
                return false;
            }
            joined = &mut task => joined,
        };
        let mut tracker = match joined {
            Ok(tracker) => tracker,
            Err(err) => {
                tracing::error!(%root, %err, "State sync task failed");
                session.finish(Err(SyncError::EngineFailure(format!(
                    "session task failed: {err}"
                ))));
                session.settled.fire();
                return false;
            }
        };

        let report = tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                session.abort(SyncError::ShutdownRequested);
                return false;
            }
            report = spindown(&mut tracker) => report,
        };
        self.tracker = Some(tracker);
        session.settled.fire();
        tracing::debug!(%root, settled = report.settled(), "State sync retired");
        true
    }

    fn reject_queued(&mut self) {
        self.requests.close();
        while let Ok(session) = self.requests.try_recv() {
            session.abort(SyncError::ShutdownRequested);
        }
    }
}

impl<E> Drop for Supervisor<E> {
    fn drop(&mut self) {
        self.closed.fire();
    }
}

/// Fires the session's cancel signal when the supervisor leaves the
/// session, on every path including unwinding.
struct CancelOnDrop(Arc<SyncSession>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel.fire();
    }
}

/// Body of a session task: run the engine, fix the outcome, hand the
/// tracker back.
async fn execute<E: TrieSyncEngine>(
    engine: Arc<E>,
    session: Arc<SyncSession>,
    mut tracker: RequestTracker,
) -> RequestTracker {
    session.started.fire();
    let result = engine.sync(session.root(), &session.cancel, &mut tracker).await;
    if let Err(err) = &result {
        tracing::debug!(root = %session.root(), %err, "State sync ended with error");
    }
    session.finish(result);
    tracker
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use statefetch_core::{Hash, PeerId};
    use statefetch_peerset::{MemoryPeerPool, PeerPool};

    use crate::error::Result;

    /// Issues one request to peer 1, then waits to be cancelled.
    struct OneRequestEngine;

    #[async_trait]
    impl TrieSyncEngine for OneRequestEngine {
        async fn sync(
            &self,
            root: StateRoot,
            cancel: &Signal,
            requests: &mut RequestTracker,
        ) -> Result<()> {
            let peer = PeerId::from_bytes([1; 32]);
            if requests.pool().reserve(&peer) {
                requests.issue(peer, vec![root]);
            }
            cancel.wait().await;
            Err(SyncError::Cancelled)
        }
    }

    fn coordinator() -> (Arc<MemoryPeerPool>, SyncCoordinator) {
        let pool = Arc::new(MemoryPeerPool::with_peers([PeerId::from_bytes([1; 32])]));
        let config = SyncConfig::default().with_request_timeout(Duration::from_secs(3));
        let (_deliveries, tracker) = RequestTracker::channel(pool.clone(), &config);
        let coordinator = SyncCoordinator::spawn(Arc::new(OneRequestEngine), tracker, &config);
        (pool, coordinator)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_after_peer_is_idle() {
        let (pool, coordinator) = coordinator();
        let handle = coordinator.request_sync(Hash::digest(b"a")).await;

        assert_eq!(handle.cancel().await, Err(SyncError::Cancelled));
        assert_eq!(pool.idle_count(&PeerId::from_bytes([1; 32])), 1);
        assert!(pool.is_idle(&PeerId::from_bytes([1; 32])));
    }

    #[tokio::test]
    async fn test_request_after_shutdown_is_rejected() {
        let (_pool, coordinator) = coordinator();
        coordinator.shutdown();
        coordinator.stopped().await;

        let handle = coordinator.request_sync(Hash::digest(b"late")).await;
        assert!(handle.is_done());
        assert_eq!(handle.wait().await, Err(SyncError::ShutdownRequested));
    }
}
