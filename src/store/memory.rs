//! In-memory store implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use super::{
    DeletePropagation, ObjectStore, StoreError, WATCH_CHANNEL_CAPACITY, WatchEvent,
    check_resource_version, owner_key,
};
use crate::core::clock::{Clock, SystemClock};
use crate::core::cronjob::{self, CronJob};
use crate::core::job::Job;
use crate::core::types::{ObjectKey, Uid};

#[derive(Default)]
struct State {
    cronjobs: HashMap<ObjectKey, CronJob>,
    jobs: HashMap<ObjectKey, Job>,
    /// Owner key -> keys of the jobs it controls.
    by_owner: HashMap<ObjectKey, BTreeSet<ObjectKey>>,
}

impl State {
    fn index_job(&mut self, job: &Job) {
        if let Some(owner) = owner_key(&job.metadata) {
            self.by_owner.entry(owner).or_default().insert(job.key());
        }
    }

    fn unindex_job(&mut self, job: &Job) {
        if let Some(owner) = owner_key(&job.metadata) {
            if let Some(children) = self.by_owner.get_mut(&owner) {
                children.remove(&job.key());
                if children.is_empty() {
                    self.by_owner.remove(&owner);
                }
            }
        }
    }
}

/// In-memory store backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStore {
    state: RwLock<State>,
    resource_version: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Create a new empty store stamping objects with wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new empty store stamping objects with the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            resource_version: AtomicU64::new(0),
            events,
            clock,
        }
    }

    fn next_resource_version(&self) -> u64 {
        self.resource_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, events: impl IntoIterator<Item = WatchEvent>) {
        for event in events {
            // Sending only fails when nobody is subscribed.
            let _ = self.events.send(event);
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get_cronjob(&self, key: &ObjectKey) -> Result<CronJob, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        state
            .cronjobs
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("cronjob: {}", key)))
    }

    async fn list_cronjobs(&self, namespace: Option<&str>) -> Result<Vec<CronJob>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut result: Vec<_> = state
            .cronjobs
            .values()
            .filter(|c| namespace.is_none_or(|ns| c.metadata.namespace == ns))
            .cloned()
            .collect();
        result.sort_by_key(|c| c.key());
        Ok(result)
    }

    async fn create_cronjob(&self, mut cronjob: CronJob) -> Result<CronJob, StoreError> {
        let key = cronjob.key();
        {
            let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
            if state.cronjobs.contains_key(&key) {
                return Err(StoreError::AlreadyExists(format!("cronjob: {}", key)));
            }
            cronjob.metadata.uid = Some(Uid::new());
            cronjob.metadata.creation_timestamp = Some(self.clock.now());
            cronjob.metadata.resource_version = Some(self.next_resource_version());
            state.cronjobs.insert(key.clone(), cronjob.clone());
        }
        self.notify([WatchEvent::CronJobChanged(key)]);
        Ok(cronjob)
    }

    async fn update_cronjob(&self, cronjob: CronJob) -> Result<CronJob, StoreError> {
        let key = cronjob.key();
        let updated = {
            let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
            let existing = state
                .cronjobs
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(format!("cronjob: {}", key)))?;
            check_resource_version(
                &key,
                cronjob.metadata.resource_version,
                existing.metadata.resource_version,
            )?;

            if existing.spec == cronjob.spec
                && existing.metadata.labels == cronjob.metadata.labels
                && existing.metadata.annotations == cronjob.metadata.annotations
            {
                return Ok(existing.clone());
            }

            let mut updated = existing.clone();
            updated.spec = cronjob.spec;
            updated.metadata.labels = cronjob.metadata.labels;
            updated.metadata.annotations = cronjob.metadata.annotations;
            updated.metadata.resource_version = Some(self.next_resource_version());
            state.cronjobs.insert(key.clone(), updated.clone());
            updated
        };
        self.notify([WatchEvent::CronJobChanged(key)]);
        Ok(updated)
    }

    async fn update_cronjob_status(&self, cronjob: &CronJob) -> Result<CronJob, StoreError> {
        let key = cronjob.key();
        let updated = {
            let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
            let existing = state
                .cronjobs
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(format!("cronjob: {}", key)))?;
            check_resource_version(
                &key,
                cronjob.metadata.resource_version,
                existing.metadata.resource_version,
            )?;

            if existing.status == cronjob.status {
                return Ok(existing.clone());
            }

            let mut updated = existing.clone();
            updated.status = cronjob.status.clone();
            updated.metadata.resource_version = Some(self.next_resource_version());
            state.cronjobs.insert(key.clone(), updated.clone());
            updated
        };
        self.notify([WatchEvent::CronJobChanged(key)]);
        Ok(updated)
    }

    async fn delete_cronjob(
        &self,
        key: &ObjectKey,
        propagation: DeletePropagation,
    ) -> Result<(), StoreError> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
            let removed = state
                .cronjobs
                .remove(key)
                .ok_or_else(|| StoreError::NotFound(format!("cronjob: {}", key)))?;

            let children = state.by_owner.remove(key).unwrap_or_default();
            for child_key in children {
                let Some(child) = state.jobs.get(&child_key) else {
                    continue;
                };
                // A child of an earlier CronJob with the same name is not ours.
                let owned = child
                    .metadata
                    .controller_owner()
                    .is_some_and(|o| Some(o.uid) == removed.metadata.uid);
                if !owned {
                    continue;
                }

                match propagation {
                    DeletePropagation::Background | DeletePropagation::Foreground => {
                        state.jobs.remove(&child_key);
                        events.push(WatchEvent::JobDeleted {
                            key: child_key,
                            owner: Some(key.clone()),
                        });
                    }
                    DeletePropagation::Orphan => {
                        let resource_version = self.next_resource_version();
                        if let Some(child) = state.jobs.get_mut(&child_key) {
                            child.metadata.owner_references.retain(|o| {
                                !(o.controller && o.kind == cronjob::KIND && o.name == key.name)
                            });
                            child.metadata.resource_version = Some(resource_version);
                        }
                        events.push(WatchEvent::JobChanged {
                            key: child_key,
                            owner: None,
                        });
                    }
                }
            }
        }
        events.push(WatchEvent::CronJobDeleted(key.clone()));
        self.notify(events);
        Ok(())
    }

    async fn get_job(&self, key: &ObjectKey) -> Result<Job, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        state
            .jobs
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("job: {}", key)))
    }

    async fn list_owned_jobs(
        &self,
        namespace: &str,
        owner_name: &str,
    ) -> Result<Vec<Job>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        let owner = ObjectKey::new(namespace, owner_name);
        let result = state
            .by_owner
            .get(&owner)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|key| state.jobs.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(result)
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut result: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.metadata.namespace == namespace)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(result)
    }

    async fn create_job(&self, mut job: Job) -> Result<Job, StoreError> {
        let key = job.key();
        {
            let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
            if state.jobs.contains_key(&key) {
                return Err(StoreError::AlreadyExists(format!("job: {}", key)));
            }
            job.metadata.uid = Some(Uid::new());
            job.metadata.creation_timestamp = Some(self.clock.now());
            job.metadata.resource_version = Some(self.next_resource_version());
            state.index_job(&job);
            state.jobs.insert(key.clone(), job.clone());
        }
        self.notify([WatchEvent::JobChanged {
            key,
            owner: owner_key(&job.metadata),
        }]);
        Ok(job)
    }

    async fn update_job_status(&self, job: &Job) -> Result<Job, StoreError> {
        let key = job.key();
        let updated = {
            let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
            let existing = state
                .jobs
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(format!("job: {}", key)))?;
            check_resource_version(
                &key,
                job.metadata.resource_version,
                existing.metadata.resource_version,
            )?;

            if existing.status == job.status {
                return Ok(existing.clone());
            }

            let mut updated = existing.clone();
            updated.status = job.status.clone();
            updated.metadata.resource_version = Some(self.next_resource_version());
            state.jobs.insert(key.clone(), updated.clone());
            updated
        };
        self.notify([WatchEvent::JobChanged {
            key,
            owner: owner_key(&updated.metadata),
        }]);
        Ok(updated)
    }

    async fn delete_job(
        &self,
        key: &ObjectKey,
        _propagation: DeletePropagation,
    ) -> Result<(), StoreError> {
        let removed = {
            let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
            let removed = state
                .jobs
                .remove(key)
                .ok_or_else(|| StoreError::NotFound(format!("job: {}", key)))?;
            state.unindex_job(&removed);
            removed
        };
        self.notify([WatchEvent::JobDeleted {
            key: key.clone(),
            owner: owner_key(&removed.metadata),
        }]);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
