//! Coordinator lifecycle tests: replacement ordering, cancellation,
//! shutdown and terminal errors.

use std::sync::Arc;
use std::time::Duration;

use statefetch_sync::{SyncConfig, SyncError};
use statefetch_testkit::fixtures::{init_tracing, peer, root};
use statefetch_testkit::{CoordinatorFixture, Finish, JournalEntry, Script};

fn config() -> SyncConfig {
    SyncConfig::default().with_request_timeout(Duration::from_secs(2))
}

#[tokio::test(start_paused = true)]
async fn test_wait_is_stable_across_done() {
    let fixture = CoordinatorFixture::new([peer(1)], config());
    fixture.engine.script(
        root("a"),
        Script::new([peer(1)], Finish::FailAfter(Duration::from_secs(1), "disk full".into())),
    );

    let handle = fixture.coordinator.request_sync(root("a")).await;
    let early = tokio::spawn({
        let handle = handle.clone();
        async move { handle.wait().await }
    });

    let first = early.await.unwrap();
    let second = handle.wait().await;
    assert_eq!(first, Err(SyncError::EngineFailure("disk full".into())));
    assert_eq!(first, second);
    assert!(handle.is_done());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_cancel_returns_same_error() {
    let fixture = CoordinatorFixture::new([peer(1), peer(2)], config());
    fixture
        .engine
        .script(root("a"), Script::new([peer(1), peer(2)], Finish::OnCancel));

    let handle = fixture.coordinator.request_sync(root("a")).await;
    let (a, b) = tokio::time::timeout(Duration::from_secs(60), async {
        tokio::join!(handle.cancel(), handle.cancel())
    })
    .await
    .expect("cancel returned");

    assert_eq!(a, Err(SyncError::Cancelled));
    assert_eq!(a, b);
    assert_eq!(fixture.pool.idle_count(&peer(1)), 1);
    assert_eq!(fixture.pool.idle_count(&peer(2)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_replacement_starts_after_drain() {
    init_tracing();
    let fixture = CoordinatorFixture::new([peer(1), peer(2)], config());
    fixture
        .engine
        .script(root("a"), Script::new([peer(1), peer(2)], Finish::OnCancel));
    fixture
        .engine
        .script(root("b"), Script::new([peer(1), peer(2)], Finish::OnCancel));

    let a = fixture.coordinator.request_sync(root("a")).await;
    // peer 1 answers; peer 2 stays silent until its request times out
    fixture.deliver(peer(1)).await;
    let b = fixture.coordinator.request_sync(root("b")).await;

    assert_eq!(a.wait().await, Err(SyncError::Cancelled));
    assert!(!b.is_done());

    let journal = &fixture.journal;
    let b_started = journal.positions(&JournalEntry::EngineStarted(root("b")));
    let a_finished = journal.positions(&JournalEntry::EngineFinished(root("a")));
    assert_eq!(b_started.len(), 1);
    assert!(a_finished[0] < b_started[0]);
    for p in [peer(1), peer(2)] {
        let idles = journal.positions(&JournalEntry::Idle(p));
        assert_eq!(idles.len(), 1, "peer {p}");
        assert!(idles[0] < b_started[0], "peer {p} idled after replacement started");
        assert_eq!(journal.count(&JournalEntry::Issued(p)), 2);
        assert_eq!(journal.count(&JournalEntry::ReserveRejected(p)), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_same_root_twice_is_a_replace() {
    let fixture = CoordinatorFixture::new([peer(1)], config());
    fixture
        .engine
        .script(root("a"), Script::new([peer(1)], Finish::OnCancel));

    let first = fixture.coordinator.request_sync(root("a")).await;
    let second = fixture.coordinator.request_sync(root("a")).await;

    assert_eq!(first.wait().await, Err(SyncError::Cancelled));
    assert!(!second.is_done());

    let journal = &fixture.journal;
    let starts = journal.positions(&JournalEntry::EngineStarted(root("a")));
    let idles = journal.positions(&JournalEntry::Idle(peer(1)));
    assert_eq!(starts.len(), 2);
    assert_eq!(idles.len(), 1);
    assert!(idles[0] < starts[1]);
    assert_eq!(journal.count(&JournalEntry::Issued(peer(1))), 2);
}

#[tokio::test(start_paused = true)]
async fn test_completion_drains_before_next_request() {
    let fixture = CoordinatorFixture::new([peer(1)], config());
    fixture
        .engine
        .script(root("a"), Script::new([peer(1)], Finish::Immediately));

    let handle = fixture.coordinator.request_sync(root("a")).await;
    assert_eq!(handle.wait().await, Ok(()));
    // cancel after completion still waits for the drain, then reports the outcome
    assert_eq!(handle.cancel().await, Ok(()));
    assert_eq!(fixture.pool.idle_count(&peer(1)), 1);
    assert!(fixture.pool.is_idle(&peer(1)));
}

#[tokio::test(start_paused = true)]
async fn test_engine_failure_is_terminal_error() {
    let fixture = CoordinatorFixture::new([peer(1)], config());
    fixture.engine.script(
        root("a"),
        Script::new([peer(1)], Finish::Fail("bad node".into())),
    );
    fixture
        .engine
        .script(root("b"), Script::new([peer(1)], Finish::Immediately));

    let failed = fixture.coordinator.request_sync(root("a")).await;
    assert_eq!(
        failed.wait().await,
        Err(SyncError::EngineFailure("bad node".into()))
    );

    // the coordinator keeps serving after a failed session
    let next = fixture.coordinator.request_sync(root("b")).await;
    assert_eq!(next.wait().await, Ok(()));
    assert_eq!(fixture.journal.count(&JournalEntry::Issued(peer(1))), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_running() {
    let fixture = CoordinatorFixture::new([peer(1)], config());
    fixture
        .engine
        .script(root("a"), Script::new([peer(1)], Finish::OnCancel));

    let handle = fixture.coordinator.request_sync(root("a")).await;
    fixture.coordinator.shutdown();

    assert_eq!(handle.wait().await, Err(SyncError::ShutdownRequested));
    assert_eq!(handle.cancel().await, Err(SyncError::ShutdownRequested));
    tokio::time::timeout(Duration::from_secs(10), fixture.coordinator.stopped())
        .await
        .expect("supervisor exited");
    assert!(fixture.coordinator.is_stopped());

    let late = fixture.coordinator.request_sync(root("b")).await;
    assert!(late.is_done());
    assert_eq!(late.wait().await, Err(SyncError::ShutdownRequested));
}

#[tokio::test(start_paused = true)]
async fn test_queued_requests_are_rejected_on_shutdown() {
    let fixture = Arc::new(CoordinatorFixture::new(
        [peer(1)],
        SyncConfig::default().with_request_timeout(Duration::from_secs(30)),
    ));
    fixture
        .engine
        .script(root("a"), Script::new([peer(1)], Finish::OnCancel));

    let running = fixture.coordinator.request_sync(root("a")).await;
    let queued = ["b", "c"].map(|label| {
        let fixture = Arc::clone(&fixture);
        tokio::spawn(async move { fixture.coordinator.request_sync(root(label)).await })
    });
    // let both requests reach the supervisor while it drains the first session
    tokio::time::sleep(Duration::from_millis(10)).await;
    fixture.coordinator.shutdown();

    for task in queued {
        let handle = task.await.unwrap();
        assert_eq!(handle.wait().await, Err(SyncError::ShutdownRequested));
    }
    assert_eq!(running.wait().await, Err(SyncError::Cancelled));
    fixture.coordinator.stopped().await;
    assert_eq!(
        fixture.journal.count(&JournalEntry::EngineStarted(root("b"))),
        0
    );
    assert_eq!(
        fixture.journal.count(&JournalEntry::EngineStarted(root("c"))),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropping_coordinator_ends_running_session() {
    let fixture = CoordinatorFixture::new([peer(1)], config());
    fixture
        .engine
        .script(root("a"), Script::new([peer(1)], Finish::OnCancel));

    let handle = fixture.coordinator.request_sync(root("a")).await;
    let CoordinatorFixture {
        coordinator,
        journal,
        ..
    } = fixture;
    drop(coordinator);

    let result = tokio::time::timeout(Duration::from_secs(60), handle.wait())
        .await
        .expect("session ended");
    assert_eq!(result, Err(SyncError::ShutdownRequested));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(journal.count(&JournalEntry::EngineFinished(root("a"))), 1);
}
