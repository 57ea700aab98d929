//! One reconcile pass for one CronJob.
//!
//! The pass reads the declaration and its jobs, writes the observed status,
//! prunes history, and starts at most one job for the most recent missed
//! firing. It keeps no state between passes.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::classify::{Classification, classify};
use super::concurrency::{Admission, admit};
use super::factory::build_job;
use super::history::select_for_deletion;
use crate::core::clock::{Clock, SystemClock};
use crate::core::cronjob::{CronJob, CronJobStatus};
use crate::core::job::Job;
use crate::core::schedule::compute_schedule;
use crate::core::types::ObjectKey;
use crate::events::{DeletionReason, Event, EventBus, SkipReason};
use crate::store::{DeletePropagation, ObjectStore, StoreError};

/// Errors that make a pass worth retrying.
///
/// Problems with the declaration itself are reported through
/// [`Disposition`] instead, so every variant here is retried with backoff.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A store call failed, including optimistic-concurrency conflicts.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The pass did not finish in time.
    #[error("reconcile pass timed out after {0:?}")]
    Timeout(Duration),

    /// The pass panicked.
    #[error("reconcile pass panicked: {0}")]
    Panicked(String),
}

impl ReconcileError {
    /// Whether the pass lost an optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_conflict())
    }
}

/// What a successful pass decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The CronJob no longer exists.
    Missing,
    /// The CronJob is suspended.
    Suspended,
    /// The schedule is invalid or too far behind to evaluate.
    ScheduleRejected,
    /// No firing is due.
    Idle,
    /// The due firing is past its starting deadline.
    MissedDeadline { scheduled_at: Option<DateTime<Utc>> },
    /// The Forbid policy held the firing back.
    ConcurrencySkipped { scheduled_at: DateTime<Utc> },
    /// The job template could not be turned into a job.
    TemplateRejected,
    /// A job was created for the firing.
    Created {
        job: String,
        scheduled_at: DateTime<Utc>,
    },
    /// The job for the firing already existed.
    AlreadyExists {
        job: String,
        scheduled_at: DateTime<Utc>,
    },
}

/// Result of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Run again no later than this, absent other events.
    pub requeue_after: Option<Duration>,
    pub disposition: Disposition,
}

impl ReconcileOutcome {
    fn done(disposition: Disposition) -> Self {
        Self {
            requeue_after: None,
            disposition,
        }
    }

    fn requeue(after: Duration, disposition: Disposition) -> Self {
        Self {
            requeue_after: Some(after),
            disposition,
        }
    }
}

/// Drives one CronJob toward its declared state.
pub struct Reconciler<S: ObjectStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl<S: ObjectStore> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            events: Arc::clone(&self.events),
        }
    }
}

impl<S: ObjectStore> Reconciler<S> {
    /// Create a reconciler using wall-clock time and a silent event bus.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Use the given clock for "now".
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish decisions on the given event bus.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Get the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Run one pass for `key`.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome, ReconcileError> {
        let cronjob = match self.store.get_cronjob(key).await {
            Ok(cronjob) => cronjob,
            Err(e) if e.is_not_found() => {
                debug!(cronjob = %key, "cronjob not found, nothing to do");
                return Ok(ReconcileOutcome::done(Disposition::Missing));
            }
            Err(e) => return Err(e.into()),
        };

        let children: Vec<Job> = self
            .store
            .list_owned_jobs(&key.namespace, &key.name)
            .await?
            .into_iter()
            .filter(|job| {
                job.metadata
                    .controller_owner()
                    .is_some_and(|owner| Some(owner.uid) == cronjob.metadata.uid)
            })
            .collect();
        let classification = classify(children);

        let cronjob = self.write_status(cronjob, &classification).await?;

        self.prune(key, &classification.failed, cronjob.spec.failed_jobs_history_limit)
            .await;
        self.prune(
            key,
            &classification.successful,
            cronjob.spec.successful_jobs_history_limit,
        )
        .await;

        if cronjob.spec.suspend {
            debug!(cronjob = %key, "suspended, not scheduling");
            return Ok(ReconcileOutcome::done(Disposition::Suspended));
        }

        let now = self.clock.now();
        let schedule = match cronjob.schedule() {
            Ok(schedule) => schedule,
            Err(e) => {
                error!(
                    cronjob = %key,
                    schedule = %cronjob.spec.schedule.expression(),
                    error = %e,
                    "unparseable schedule"
                );
                self.events
                    .emit(Event::schedule_rejected(key.clone(), e.to_string()))
                    .await;
                return Ok(ReconcileOutcome::done(Disposition::ScheduleRejected));
            }
        };

        let earliest = cronjob
            .status
            .last_schedule_time
            .or(cronjob.metadata.creation_timestamp)
            .unwrap_or(now);
        let deadline = cronjob.starting_deadline();

        let window = match compute_schedule(&schedule, earliest, deadline, now) {
            Ok(window) => window,
            Err(e) => {
                error!(
                    cronjob = %key,
                    earliest = %earliest,
                    now = %now,
                    error = %e,
                    "cannot determine missed firings"
                );
                self.events
                    .emit(Event::schedule_rejected(key.clone(), e.to_string()))
                    .await;
                return Ok(ReconcileOutcome::done(Disposition::ScheduleRejected));
            }
        };
        let requeue_after = (window.next - now).to_std().unwrap_or(Duration::ZERO);

        let Some(scheduled_at) = window.missed else {
            if window.deadline_skipped {
                info!(
                    cronjob = %key,
                    next = %window.next,
                    "firing missed its starting deadline"
                );
                self.events
                    .emit(Event::run_skipped(key.clone(), None, SkipReason::MissedDeadline))
                    .await;
                return Ok(ReconcileOutcome::requeue(
                    requeue_after,
                    Disposition::MissedDeadline { scheduled_at: None },
                ));
            }
            debug!(cronjob = %key, next = %window.next, "no firing due");
            return Ok(ReconcileOutcome::requeue(requeue_after, Disposition::Idle));
        };

        if let Some(deadline) = deadline {
            if now.checked_sub_signed(deadline).is_some_and(|cutoff| scheduled_at < cutoff) {
                info!(
                    cronjob = %key,
                    scheduled_at = %scheduled_at,
                    next = %window.next,
                    "firing missed its starting deadline"
                );
                self.events
                    .emit(Event::run_skipped(
                        key.clone(),
                        Some(scheduled_at),
                        SkipReason::MissedDeadline,
                    ))
                    .await;
                return Ok(ReconcileOutcome::requeue(
                    requeue_after,
                    Disposition::MissedDeadline {
                        scheduled_at: Some(scheduled_at),
                    },
                ));
            }
        }

        match admit(cronjob.spec.concurrency_policy, &classification.active) {
            Admission::Proceed => {}
            Admission::Skip => {
                debug!(
                    cronjob = %key,
                    scheduled_at = %scheduled_at,
                    active = classification.active.len(),
                    "jobs still running, skipping firing"
                );
                self.events
                    .emit(Event::run_skipped(
                        key.clone(),
                        Some(scheduled_at),
                        SkipReason::ConcurrencyForbid,
                    ))
                    .await;
                return Ok(ReconcileOutcome::requeue(
                    requeue_after,
                    Disposition::ConcurrencySkipped { scheduled_at },
                ));
            }
            Admission::Replace(victims) => {
                for victim in victims {
                    match self
                        .store
                        .delete_job(&victim.key(), DeletePropagation::Background)
                        .await
                    {
                        Ok(()) => {
                            info!(cronjob = %key, job = %victim.name(), "replaced running job");
                            self.events
                                .emit(Event::job_deleted(
                                    key.clone(),
                                    victim.name(),
                                    DeletionReason::Replaced,
                                ))
                                .await;
                        }
                        Err(e) if e.is_not_found() => {
                            debug!(cronjob = %key, job = %victim.name(), "job to replace already gone");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        let job = match build_job(&cronjob, scheduled_at) {
            Ok(job) => job,
            Err(e) => {
                error!(cronjob = %key, error = %e, "cannot build job from template");
                return Ok(ReconcileOutcome::done(Disposition::TemplateRejected));
            }
        };
        let job_name = job.name().to_string();

        match self.store.create_job(job).await {
            Ok(created) => {
                info!(
                    cronjob = %key,
                    job = %job_name,
                    scheduled_at = %scheduled_at,
                    "created job"
                );
                self.events
                    .emit(Event::job_created(key.clone(), &job_name, scheduled_at))
                    .await;
                self.record_created(cronjob, &created, scheduled_at).await;
                Ok(ReconcileOutcome::requeue(
                    requeue_after,
                    Disposition::Created {
                        job: job_name,
                        scheduled_at,
                    },
                ))
            }
            Err(e) if e.is_already_exists() => {
                debug!(cronjob = %key, job = %job_name, "job for firing already exists");
                Ok(ReconcileOutcome::requeue(
                    requeue_after,
                    Disposition::AlreadyExists {
                        job: job_name,
                        scheduled_at,
                    },
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write active refs and last schedule time derived from the children.
    async fn write_status(
        &self,
        mut cronjob: CronJob,
        classification: &Classification,
    ) -> Result<CronJob, ReconcileError> {
        let mut active: Vec<_> = classification.active.iter().map(Job::reference).collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));

        let last_schedule_time = match (
            cronjob.status.last_schedule_time,
            classification.latest_scheduled_at,
        ) {
            (Some(current), Some(observed)) => Some(current.max(observed)),
            (current, observed) => current.or(observed),
        };

        cronjob.status = CronJobStatus {
            active,
            last_schedule_time,
        };
        Ok(self.store.update_cronjob_status(&cronjob).await?)
    }

    /// Delete surplus finished jobs. Failures are logged and skipped.
    async fn prune(&self, key: &ObjectKey, finished: &[Job], limit: Option<u32>) {
        for victim in select_for_deletion(finished, limit) {
            match self
                .store
                .delete_job(&victim.key(), DeletePropagation::Background)
                .await
            {
                Ok(()) => {
                    info!(cronjob = %key, job = %victim.name(), "deleted job beyond history limit");
                    self.events
                        .emit(Event::job_deleted(
                            key.clone(),
                            victim.name(),
                            DeletionReason::HistoryLimit,
                        ))
                        .await;
                }
                Err(e) if e.is_not_found() => {
                    debug!(cronjob = %key, job = %victim.name(), "pruned job already gone");
                }
                Err(e) => {
                    warn!(
                        cronjob = %key,
                        job = %victim.name(),
                        error = %e,
                        "failed to delete job beyond history limit"
                    );
                }
            }
        }
    }

    /// Record a newly created job in the status. The next pass derives the
    /// same values from the children, so failure here is only logged.
    async fn record_created(&self, mut cronjob: CronJob, job: &Job, scheduled_at: DateTime<Utc>) {
        cronjob.status.active.push(job.reference());
        cronjob.status.active.sort_by(|a, b| a.name.cmp(&b.name));
        if cronjob
            .status
            .last_schedule_time
            .is_none_or(|current| scheduled_at > current)
        {
            cronjob.status.last_schedule_time = Some(scheduled_at);
        }

        if let Err(e) = self.store.update_cronjob_status(&cronjob).await {
            warn!(
                cronjob = %cronjob.key(),
                job = %job.name(),
                error = %e,
                "failed to record created job in status"
            );
        }
    }
}
