//! End-to-end reconcile scenarios.
//!
//! Each scenario stores a CronJob (and sometimes its jobs) in an in-memory
//! store, moves a manual clock, runs one reconcile pass, and checks the
//! store and the emitted events.

use crate::common::{Harness, at};

use chrono::Duration as ChronoDuration;
use cronlet::events::{DeletionReason, SkipReason};
use cronlet::testing::{CronJobBuilder, JobBuilder};
use cronlet::{ConcurrencyPolicy, Disposition, Event, FinishedState, ObjectKey, ObjectStore};
use std::time::Duration;

/// An every-minute CronJob three minutes after creation gets one
/// job, for the most recent of the three elapsed firings.
#[tokio::test]
async fn test_creates_job_for_latest_missed_firing() {
    let h = Harness::new(at(12, 0, 0)).await;
    let cronjob = h
        .store
        .create_cronjob(CronJobBuilder::new("report").schedule("* * * * *").build())
        .await
        .unwrap();
    h.clock.advance(ChronoDuration::minutes(3));

    let outcome = h.reconciler.reconcile(&cronjob.key()).await.unwrap();

    assert_eq!(
        outcome.disposition,
        Disposition::Created {
            job: "report-1705320180".to_string(),
            scheduled_at: at(12, 3, 0),
        }
    );
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(60)));

    let jobs = h.store.list_jobs("default").await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name(), "report-1705320180");
    assert_eq!(jobs[0].scheduled_at().unwrap().unwrap(), at(12, 3, 0));
    assert_eq!(
        jobs[0].metadata.controller_owner().map(|o| o.uid),
        cronjob.metadata.uid
    );

    let stored = h.store.get_cronjob(&cronjob.key()).await.unwrap();
    assert_eq!(stored.status.last_schedule_time, Some(at(12, 3, 0)));
    assert_eq!(stored.status.active.len(), 1);

    assert_eq!(h.recorder.created_jobs().await, vec!["report-1705320180"]);
}

/// The only elapsed firing is 90s old and the starting deadline
/// is 30s, so nothing is created and the pass waits for the next firing.
#[tokio::test]
async fn test_firing_past_deadline_is_skipped() {
    let h = Harness::new(at(12, 0, 0)).await;
    let cronjob = h
        .store
        .create_cronjob(
            CronJobBuilder::new("report")
                .schedule("*/5 * * * *")
                .starting_deadline_seconds(30)
                .build(),
        )
        .await
        .unwrap();
    h.clock.set(at(12, 6, 30));

    let outcome = h.reconciler.reconcile(&cronjob.key()).await.unwrap();

    assert_eq!(
        outcome.disposition,
        Disposition::MissedDeadline { scheduled_at: None }
    );
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(210)));
    assert!(h.store.list_jobs("default").await.unwrap().is_empty());

    let events = h.recorder.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        Event::RunSkipped {
            reason: SkipReason::MissedDeadline,
            ..
        }
    )));
}

/// Forbid with a running job holds the firing back and keeps the
/// running job in the status.
#[tokio::test]
async fn test_forbid_keeps_running_job() {
    let h = Harness::new(at(12, 0, 0)).await;
    let cronjob = h
        .store
        .create_cronjob(
            CronJobBuilder::new("report")
                .concurrency_policy(ConcurrencyPolicy::Forbid)
                .build(),
        )
        .await
        .unwrap();
    let running = h
        .store
        .create_job(
            JobBuilder::for_cronjob(&cronjob, at(12, 0, 0))
                .started_at(at(12, 0, 1))
                .build(),
        )
        .await
        .unwrap();
    h.clock.set(at(12, 1, 30));

    let outcome = h.reconciler.reconcile(&cronjob.key()).await.unwrap();

    assert_eq!(
        outcome.disposition,
        Disposition::ConcurrencySkipped {
            scheduled_at: at(12, 1, 0)
        }
    );
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(30)));

    let jobs = h.store.list_jobs("default").await.unwrap();
    assert_eq!(jobs.len(), 1);

    let stored = h.store.get_cronjob(&cronjob.key()).await.unwrap();
    let active: Vec<_> = stored.status.active.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(active, vec![running.name()]);
}

/// Replace deletes the running job and creates one for the
/// missed firing.
#[tokio::test]
async fn test_replace_swaps_running_job() {
    let h = Harness::new(at(12, 0, 0)).await;
    let cronjob = h
        .store
        .create_cronjob(
            CronJobBuilder::new("report")
                .concurrency_policy(ConcurrencyPolicy::Replace)
                .build(),
        )
        .await
        .unwrap();
    let running = h
        .store
        .create_job(JobBuilder::for_cronjob(&cronjob, at(12, 0, 0)).build())
        .await
        .unwrap();
    h.clock.set(at(12, 1, 30));

    let outcome = h.reconciler.reconcile(&cronjob.key()).await.unwrap();

    assert_eq!(
        outcome.disposition,
        Disposition::Created {
            job: "report-1705320060".to_string(),
            scheduled_at: at(12, 1, 0),
        }
    );

    let names: Vec<String> = h
        .store
        .list_jobs("default")
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.metadata.name)
        .collect();
    assert_eq!(names, vec!["report-1705320060".to_string()]);
    assert!(h.store.get_job(&running.key()).await.unwrap_err().is_not_found());

    let events = h.recorder.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        Event::JobDeleted { job, reason: DeletionReason::Replaced, .. } if job == running.name()
    )));
}

/// With a failed history limit of 2, the oldest of three failed
/// jobs is deleted and the two newest remain.
#[tokio::test]
async fn test_failed_history_is_pruned() {
    let h = Harness::new(at(12, 0, 0)).await;
    let cronjob = h
        .store
        .create_cronjob(
            CronJobBuilder::new("report")
                .schedule("0 * * * *")
                .failed_history_limit(2)
                .build(),
        )
        .await
        .unwrap();
    for hour in [9, 10, 11] {
        h.store
            .create_job(
                JobBuilder::for_cronjob(&cronjob, at(hour, 0, 0))
                    .started_at(at(hour, 0, 5))
                    .failed_at(at(hour, 1, 0))
                    .build(),
            )
            .await
            .unwrap();
    }
    h.clock.set(at(12, 0, 30));

    h.reconciler.reconcile(&cronjob.key()).await.unwrap();

    let mut failed: Vec<String> = h
        .store
        .list_jobs("default")
        .await
        .unwrap()
        .into_iter()
        .filter(|j| j.finished_state() == Some(FinishedState::Failed))
        .map(|j| j.metadata.name)
        .collect();
    failed.sort();
    assert_eq!(
        failed,
        vec![
            format!("report-{}", at(10, 0, 0).timestamp()),
            format!("report-{}", at(11, 0, 0).timestamp()),
        ]
    );

    let deleted: Vec<String> = h
        .recorder
        .events()
        .await
        .into_iter()
        .filter_map(|e| match e {
            Event::JobDeleted {
                job,
                reason: DeletionReason::HistoryLimit,
                ..
            } => Some(job),
            _ => None,
        })
        .collect();
    assert_eq!(deleted, vec![format!("report-{}", at(9, 0, 0).timestamp())]);
}

/// A time zone shifts firings: 09:00 in New York is 14:00 UTC in January.
#[tokio::test]
async fn test_time_zone_firing_is_reported_in_utc() {
    let h = Harness::new(at(13, 0, 0)).await;
    let cronjob = h
        .store
        .create_cronjob(
            CronJobBuilder::new("standup")
                .schedule("0 9 * * *")
                .time_zone("America/New_York")
                .build(),
        )
        .await
        .unwrap();

    let idle = h.reconciler.reconcile(&cronjob.key()).await.unwrap();
    assert_eq!(idle.disposition, Disposition::Idle);
    assert_eq!(idle.requeue_after, Some(Duration::from_secs(3600)));

    h.clock.set(at(14, 0, 10));
    let outcome = h.reconciler.reconcile(&cronjob.key()).await.unwrap();
    assert_eq!(
        outcome.disposition,
        Disposition::Created {
            job: format!("standup-{}", at(14, 0, 0).timestamp()),
            scheduled_at: at(14, 0, 0),
        }
    );
}

/// A finished job leaves the active list on the next pass, and successful
/// history is trimmed to its limit.
#[tokio::test]
async fn test_completed_jobs_leave_active_and_are_trimmed() {
    let h = Harness::new(at(12, 0, 0)).await;
    let cronjob = h
        .store
        .create_cronjob(
            CronJobBuilder::new("report")
                .successful_history_limit(1)
                .build(),
        )
        .await
        .unwrap();

    for minute in 1..=2 {
        h.clock.set(at(12, minute, 0));
        h.reconciler.reconcile(&cronjob.key()).await.unwrap();

        let name = format!("report-{}", at(12, minute, 0).timestamp());
        let mut job = h
            .store
            .get_job(&ObjectKey::new("default", name))
            .await
            .unwrap();
        job.status.start_time = Some(at(12, minute, 5));
        job.mark_complete(at(12, minute, 20));
        h.store.update_job_status(&job).await.unwrap();
    }

    h.clock.set(at(12, 2, 30));
    let outcome = h.reconciler.reconcile(&cronjob.key()).await.unwrap();
    assert_eq!(outcome.disposition, Disposition::Idle);

    let stored = h.store.get_cronjob(&cronjob.key()).await.unwrap();
    assert!(stored.status.active.is_empty());
    assert_eq!(stored.status.last_schedule_time, Some(at(12, 2, 0)));

    let names: Vec<String> = h
        .store
        .list_jobs("default")
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.metadata.name)
        .collect();
    assert_eq!(names, vec![format!("report-{}", at(12, 2, 0).timestamp())]);
}

/// Suspending stops new jobs; resuming picks up only the latest firing.
#[tokio::test]
async fn test_resume_after_suspend_runs_latest_firing_once() {
    let h = Harness::new(at(12, 0, 0)).await;
    let cronjob = h
        .store
        .create_cronjob(CronJobBuilder::new("report").suspend(true).build())
        .await
        .unwrap();

    h.clock.set(at(12, 10, 30));
    let suspended = h.reconciler.reconcile(&cronjob.key()).await.unwrap();
    assert_eq!(suspended.disposition, Disposition::Suspended);
    assert!(h.store.list_jobs("default").await.unwrap().is_empty());

    let mut resumed = h.store.get_cronjob(&cronjob.key()).await.unwrap();
    resumed.spec.suspend = false;
    h.store.update_cronjob(resumed).await.unwrap();

    let outcome = h.reconciler.reconcile(&cronjob.key()).await.unwrap();
    assert_eq!(
        outcome.disposition,
        Disposition::Created {
            job: format!("report-{}", at(12, 10, 0).timestamp()),
            scheduled_at: at(12, 10, 0),
        }
    );
    assert_eq!(h.store.list_jobs("default").await.unwrap().len(), 1);
}
