//! Controller integration tests.
//!
//! These run the full work-queue loop against an in-memory store and check
//! that store changes, reported job status, and shutdown are handled.

use crate::common::{at, wait_for};

use chrono::Duration as ChronoDuration;
use cronlet::testing::{CronJobBuilder, ManualClock, RecordingHandler};
use cronlet::{
    ConcurrencyPolicy, Controller, ControllerState, DeletePropagation, Event, EventBus,
    InMemoryStore, ObjectKey, ObjectStore,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn setup(now: chrono::DateTime<chrono::Utc>) -> (Arc<ManualClock>, Arc<InMemoryStore>) {
    let clock = Arc::new(ManualClock::new(now));
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    (clock, store)
}

/// Test: every declaration present at startup is reconciled.
#[tokio::test]
async fn test_initial_list_reconciles_every_cronjob() {
    let (clock, store) = setup(at(12, 0, 0));
    for name in ["alpha", "beta", "gamma"] {
        store
            .create_cronjob(CronJobBuilder::new(name).namespace("team").build())
            .await
            .unwrap();
    }
    clock.set(at(12, 1, 30));

    let (handle, task) = Controller::with_store(Arc::clone(&store))
        .with_clock(clock.clone())
        .with_workers(2)
        .start()
        .await;

    let jobs_in = &store;
    wait_for("a job per cronjob", WAIT, move || async move {
        jobs_in.list_jobs("team").await.unwrap().len() == 3
    })
    .await;

    // Status is recorded right after each create.
    wait_for("status of every cronjob", WAIT, move || async move {
        jobs_in
            .list_cronjobs(Some("team"))
            .await
            .unwrap()
            .iter()
            .all(|c| {
                c.status.last_schedule_time == Some(at(12, 1, 0)) && c.status.active.len() == 1
            })
    })
    .await;
    assert_eq!(store.list_jobs("team").await.unwrap().len(), 3);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: a reported terminal status frees a Forbid CronJob for its next
/// firing without any explicit enqueue.
#[tokio::test]
async fn test_job_status_change_unblocks_forbid() {
    let (clock, store) = setup(at(12, 0, 0));
    let cronjob = store
        .create_cronjob(
            CronJobBuilder::new("exclusive")
                .concurrency_policy(ConcurrencyPolicy::Forbid)
                .build(),
        )
        .await
        .unwrap();
    clock.set(at(12, 1, 10));

    let events = Arc::new(EventBus::new());
    let recorder = Arc::new(RecordingHandler::new());
    events.register(recorder.clone()).await;

    let (handle, task) = Controller::with_store(Arc::clone(&store))
        .with_clock(clock.clone())
        .with_event_bus(events)
        .start()
        .await;

    let jobs_in = &store;
    wait_for("first job", WAIT, move || async move {
        jobs_in.list_jobs("default").await.unwrap().len() == 1
    })
    .await;

    // Next firing comes due while the first job is still running.
    clock.set(at(12, 2, 10));
    handle.enqueue(cronjob.key()).await.unwrap();

    let recorded = &recorder;
    wait_for("forbid skip", WAIT, move || async move {
        recorded
            .events()
            .await
            .iter()
            .any(|e| matches!(e, Event::RunSkipped { .. }))
    })
    .await;
    assert_eq!(store.list_jobs("default").await.unwrap().len(), 1);

    // Report completion; the store event alone should trigger the next pass.
    let mut first = store.list_jobs("default").await.unwrap().remove(0);
    first.mark_complete(at(12, 2, 5));
    store.update_job_status(&first).await.unwrap();

    wait_for("second job", WAIT, move || async move {
        jobs_in.list_jobs("default").await.unwrap().len() == 2
    })
    .await;

    let key = cronjob.key();
    let key = &key;
    wait_for("status to follow the second job", WAIT, move || async move {
        let stored = jobs_in.get_cronjob(key).await.unwrap();
        stored.status.last_schedule_time == Some(at(12, 2, 0)) && stored.status.active.len() == 1
    })
    .await;

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: deleting a CronJob cascades to its jobs and the controller settles.
#[tokio::test]
async fn test_deleted_cronjob_settles() {
    let (clock, store) = setup(at(12, 0, 0));
    let cronjob = store
        .create_cronjob(CronJobBuilder::new("doomed").build())
        .await
        .unwrap();
    clock.advance(ChronoDuration::minutes(1));

    let (handle, task) = Controller::with_store(Arc::clone(&store))
        .with_clock(clock.clone())
        .start()
        .await;

    let jobs_in = &store;
    wait_for("job created", WAIT, move || async move {
        jobs_in.list_jobs("default").await.unwrap().len() == 1
    })
    .await;

    store
        .delete_cronjob(&cronjob.key(), DeletePropagation::Foreground)
        .await
        .unwrap();

    let ctl = &handle;
    wait_for("queue to drain", WAIT, move || async move {
        ctl.stats()
            .await
            .map(|s| s.queued == 0 && s.in_flight == 0 && s.scheduled == 0)
            .unwrap_or(false)
    })
    .await;
    assert!(store.list_jobs("default").await.unwrap().is_empty());

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: shutdown stops the loop and later commands report it.
#[tokio::test]
async fn test_shutdown_stops_controller() {
    let store = InMemoryStore::new();
    store
        .create_cronjob(CronJobBuilder::new("report").build())
        .await
        .unwrap();

    let (handle, task) = Controller::new(store)
        .with_shutdown_timeout(Duration::from_millis(500))
        .start()
        .await;
    assert!(handle.is_running().await);

    handle.shutdown().await.unwrap();
    tokio::time::timeout(WAIT, task)
        .await
        .expect("controller task should finish")
        .unwrap();

    assert_eq!(handle.state().await, ControllerState::Stopped);
    assert!(handle.enqueue(ObjectKey::new("default", "report")).await.is_err());
}
