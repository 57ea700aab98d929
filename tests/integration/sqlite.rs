//! SQLite-backed controller tests.
//!
//! The controller runs against a database file; state must survive a
//! restart of both the store and the controller.

use crate::common::{at, wait_for};

use cronlet::testing::{CronJobBuilder, ManualClock};
use cronlet::{Controller, ObjectKey, ObjectStore, SqliteStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

async fn open(path: &Path, clock: Arc<ManualClock>) -> Arc<SqliteStore> {
    Arc::new(SqliteStore::new(path).await.unwrap().with_clock(clock))
}

/// Test: a job created by the controller is persisted, and a restarted
/// controller does not create it again.
#[tokio::test]
async fn test_controller_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cronlet.db");
    let clock = Arc::new(ManualClock::new(at(12, 0, 0)));
    let key = ObjectKey::new("default", "report");

    {
        let store = open(&db_path, clock.clone()).await;
        store
            .create_cronjob(CronJobBuilder::new("report").build())
            .await
            .unwrap();
        clock.set(at(12, 1, 10));

        let (handle, task) = Controller::with_store(Arc::clone(&store))
            .with_clock(clock.clone())
            .start()
            .await;

        let jobs_in = &store;
        let key = &key;
        wait_for("job and status", WAIT, move || async move {
            let jobs = jobs_in.list_jobs("default").await.unwrap();
            let status = jobs_in.get_cronjob(key).await.unwrap().status;
            jobs.len() == 1 && status.last_schedule_time == Some(at(12, 1, 0))
        })
        .await;

        handle.shutdown().await.unwrap();
        let _ = task.await;
        store.close().await;
    }

    let store = open(&db_path, clock.clone()).await;
    let jobs = store.list_jobs("default").await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name(), format!("report-{}", at(12, 1, 0).timestamp()));

    let (handle, task) = Controller::with_store(Arc::clone(&store))
        .with_clock(clock.clone())
        .start()
        .await;

    let ctl = &handle;
    wait_for("initial pass", WAIT, move || async move {
        ctl.stats()
            .await
            .map(|s| s.queued == 0 && s.in_flight == 0 && s.scheduled == 1)
            .unwrap_or(false)
    })
    .await;

    assert_eq!(store.list_jobs("default").await.unwrap().len(), 1);
    let stored = store.get_cronjob(&key).await.unwrap();
    assert_eq!(stored.status.active.len(), 1);

    handle.shutdown().await.unwrap();
    let _ = task.await;
    store.close().await;
}

/// Test: resource versions keep increasing across reopen, so stale writes
/// from before a restart still conflict.
#[tokio::test]
async fn test_resource_versions_continue_after_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cronlet.db");
    let clock = Arc::new(ManualClock::new(at(12, 0, 0)));

    let store = open(&db_path, clock.clone()).await;
    let created = store
        .create_cronjob(CronJobBuilder::new("report").build())
        .await
        .unwrap();
    store.close().await;

    let store = open(&db_path, clock.clone()).await;
    let mut fresh = store.get_cronjob(&created.key()).await.unwrap();
    fresh.status.last_schedule_time = Some(at(12, 0, 0));
    let updated = store.update_cronjob_status(&fresh).await.unwrap();
    assert!(updated.metadata.resource_version > created.metadata.resource_version);

    let mut stale = created;
    stale.status.last_schedule_time = Some(at(11, 0, 0));
    let err = store.update_cronjob_status(&stale).await.unwrap_err();
    assert!(err.is_conflict());
    store.close().await;
}
