//! Testing utilities for users of the cronlet library.
//!
//! This module provides helpers for testing controllers and reconcilers:
//!
//! - [`CronJobBuilder`]: Builds CronJob declarations with terse defaults
//! - [`JobBuilder`]: Builds jobs as if a CronJob had spawned them
//! - [`RecordingHandler`]: An event handler that keeps every event
//! - [`FaultyStore`]: Wraps a store and injects failures on demand
//!
//! [`ManualClock`] is re-exported for pinning time.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};

pub use crate::core::clock::ManualClock;
use crate::core::cronjob::{ConcurrencyPolicy, CronJob, CronJobSpec};
use crate::core::job::{Job, SCHEDULED_AT_ANNOTATION};
use crate::core::types::{DEFAULT_NAMESPACE, ObjectKey, ObjectMeta};
use crate::events::{Event, EventHandler};
use crate::reconcile::job_name;
use crate::store::{DeletePropagation, ObjectStore, StoreError, WatchEvent};

/// Builder for CronJob declarations.
///
/// # Example
///
/// ```
/// use cronlet::testing::CronJobBuilder;
///
/// let cronjob = CronJobBuilder::new("nightly")
///     .schedule("0 2 * * *")
///     .failed_history_limit(1)
///     .build();
/// assert_eq!(cronjob.metadata.namespace, "default");
/// ```
pub struct CronJobBuilder {
    metadata: ObjectMeta,
    spec: CronJobSpec,
}

impl CronJobBuilder {
    /// Start a CronJob in the default namespace running every minute.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(DEFAULT_NAMESPACE, name),
            spec: CronJobSpec::new("* * * * *"),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = namespace.into();
        self
    }

    pub fn schedule(mut self, expression: &str) -> Self {
        self.spec.schedule = expression.into();
        self
    }

    pub fn time_zone(mut self, zone: impl Into<String>) -> Self {
        self.spec.time_zone = Some(zone.into());
        self
    }

    pub fn concurrency_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.spec.concurrency_policy = policy;
        self
    }

    pub fn suspend(mut self, suspend: bool) -> Self {
        self.spec.suspend = suspend;
        self
    }

    pub fn starting_deadline_seconds(mut self, seconds: u64) -> Self {
        self.spec.starting_deadline_seconds = Some(seconds);
        self
    }

    pub fn successful_history_limit(mut self, limit: u32) -> Self {
        self.spec.successful_jobs_history_limit = Some(limit);
        self
    }

    pub fn failed_history_limit(mut self, limit: u32) -> Self {
        self.spec.failed_jobs_history_limit = Some(limit);
        self
    }

    /// Set the opaque job body.
    pub fn job_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec.job_template.spec = spec;
        self
    }

    /// Add a label propagated to spawned jobs.
    pub fn job_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec
            .job_template
            .metadata
            .labels
            .insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> CronJob {
        CronJob::new(self.metadata, self.spec)
    }
}

/// Builder for jobs owned by a CronJob.
///
/// The job is named and annotated the way the reconciler would for the
/// given firing. The owner reference is only set when the CronJob has been
/// stored and carries a uid.
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    /// A running job for `cronjob`'s firing at `scheduled_at`.
    pub fn for_cronjob(cronjob: &CronJob, scheduled_at: DateTime<Utc>) -> Self {
        let mut metadata = ObjectMeta::new(
            &cronjob.metadata.namespace,
            job_name(&cronjob.metadata.name, scheduled_at),
        );
        metadata.annotations.insert(
            SCHEDULED_AT_ANNOTATION.to_string(),
            scheduled_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        if let Some(owner) = cronjob.owner_reference() {
            metadata.owner_references.push(owner);
        }
        Self {
            job: Job::new(metadata, cronjob.spec.job_template.spec.clone()),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.job.metadata.name = name.into();
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.job.status.start_time = Some(at);
        self
    }

    pub fn succeeded_at(mut self, at: DateTime<Utc>) -> Self {
        self.job.mark_complete(at);
        self
    }

    pub fn failed_at(mut self, at: DateTime<Utc>) -> Self {
        self.job.mark_failed(at, "BackoffLimitExceeded");
        self
    }

    /// Overwrite the scheduled-at annotation verbatim.
    pub fn raw_scheduled_at(mut self, value: impl Into<String>) -> Self {
        self.job
            .metadata
            .annotations
            .insert(SCHEDULED_AT_ANNOTATION.to_string(), value.into());
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

/// Event handler that records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Names of the jobs reported as created, in order.
    pub async fn created_jobs(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::JobCreated { job, .. } => Some(job.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// A store wrapper that fails selected operations on demand.
///
/// Every toggle starts off; while one is on, the matching operation fails
/// without reaching the inner store.
pub struct FaultyStore<S> {
    inner: S,
    fail_status_updates: AtomicBool,
    conflict_status_updates: AtomicBool,
    fail_job_deletes: AtomicBool,
    fail_job_creates: AtomicBool,
    fail_job_lists: AtomicBool,
}

impl<S: ObjectStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_status_updates: AtomicBool::new(false),
            conflict_status_updates: AtomicBool::new(false),
            fail_job_deletes: AtomicBool::new(false),
            fail_job_creates: AtomicBool::new(false),
            fail_job_lists: AtomicBool::new(false),
        }
    }

    /// The wrapped store, bypassing injected faults.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn fail_status_updates(&self, fail: bool) {
        self.fail_status_updates.store(fail, Ordering::SeqCst);
    }

    pub fn conflict_status_updates(&self, conflict: bool) {
        self.conflict_status_updates.store(conflict, Ordering::SeqCst);
    }

    pub fn fail_job_deletes(&self, fail: bool) {
        self.fail_job_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_job_creates(&self, fail: bool) {
        self.fail_job_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_job_lists(&self, fail: bool) {
        self.fail_job_lists.store(fail, Ordering::SeqCst);
    }

    fn injected(flag: &AtomicBool, operation: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Other(format!("injected {} failure", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for FaultyStore<S> {
    async fn get_cronjob(&self, key: &ObjectKey) -> Result<CronJob, StoreError> {
        self.inner.get_cronjob(key).await
    }

    async fn list_cronjobs(&self, namespace: Option<&str>) -> Result<Vec<CronJob>, StoreError> {
        self.inner.list_cronjobs(namespace).await
    }

    async fn create_cronjob(&self, cronjob: CronJob) -> Result<CronJob, StoreError> {
        self.inner.create_cronjob(cronjob).await
    }

    async fn update_cronjob(&self, cronjob: CronJob) -> Result<CronJob, StoreError> {
        self.inner.update_cronjob(cronjob).await
    }

    async fn update_cronjob_status(&self, cronjob: &CronJob) -> Result<CronJob, StoreError> {
        Self::injected(&self.fail_status_updates, "status update")?;
        if self.conflict_status_updates.load(Ordering::SeqCst) {
            let actual = cronjob.metadata.resource_version.unwrap_or_default() + 1;
            return Err(StoreError::Conflict {
                key: cronjob.key().to_string(),
                expected: actual - 1,
                actual,
            });
        }
        self.inner.update_cronjob_status(cronjob).await
    }

    async fn delete_cronjob(
        &self,
        key: &ObjectKey,
        propagation: DeletePropagation,
    ) -> Result<(), StoreError> {
        self.inner.delete_cronjob(key, propagation).await
    }

    async fn get_job(&self, key: &ObjectKey) -> Result<Job, StoreError> {
        self.inner.get_job(key).await
    }

    async fn list_owned_jobs(
        &self,
        namespace: &str,
        owner_name: &str,
    ) -> Result<Vec<Job>, StoreError> {
        Self::injected(&self.fail_job_lists, "job list")?;
        self.inner.list_owned_jobs(namespace, owner_name).await
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, StoreError> {
        Self::injected(&self.fail_job_lists, "job list")?;
        self.inner.list_jobs(namespace).await
    }

    async fn create_job(&self, job: Job) -> Result<Job, StoreError> {
        Self::injected(&self.fail_job_creates, "job create")?;
        self.inner.create_job(job).await
    }

    async fn update_job_status(&self, job: &Job) -> Result<Job, StoreError> {
        self.inner.update_job_status(job).await
    }

    async fn delete_job(
        &self,
        key: &ObjectKey,
        propagation: DeletePropagation,
    ) -> Result<(), StoreError> {
        Self::injected(&self.fail_job_deletes, "job delete")?;
        self.inner.delete_job(key, propagation).await
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.inner.subscribe()
    }
}
