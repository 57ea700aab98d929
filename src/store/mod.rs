//! Object store abstraction for declarations and the jobs they own.
//!
//! This module provides a trait-based store with pluggable backends
//! (in-memory, SQLite). Stores assign identity and resource versions, keep an
//! owner index from CronJobs to their Jobs, cascade deletes, and broadcast
//! watch events on every change.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::core::cronjob::{self, CronJob};
use crate::core::job::Job;
use crate::core::types::{ObjectKey, ObjectMeta};

/// Capacity of the watch event channel.
pub(crate) const WATCH_CHANNEL_CAPACITY: usize = 256;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An object with the same key already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The write carried a stale resource version.
    #[error("conflict on {key}: expected resource version {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// Store lock was poisoned.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic store error.
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// What happens to dependents when their owner is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletePropagation {
    /// Delete dependents along with the owner.
    #[default]
    Background,
    /// Delete dependents before the owner.
    Foreground,
    /// Keep dependents and strip their owner reference.
    Orphan,
}

/// Change notification broadcast by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    CronJobChanged(ObjectKey),
    CronJobDeleted(ObjectKey),
    JobChanged {
        key: ObjectKey,
        owner: Option<ObjectKey>,
    },
    JobDeleted {
        key: ObjectKey,
        owner: Option<ObjectKey>,
    },
}

impl WatchEvent {
    /// The CronJob whose reconciliation this event should trigger.
    pub fn cronjob_key(&self) -> Option<&ObjectKey> {
        match self {
            WatchEvent::CronJobChanged(key) | WatchEvent::CronJobDeleted(key) => Some(key),
            WatchEvent::JobChanged { owner, .. } | WatchEvent::JobDeleted { owner, .. } => {
                owner.as_ref()
            }
        }
    }
}

/// Owner-index key of a job: its namespace plus the name of its controlling
/// CronJob.
pub fn owner_key(meta: &ObjectMeta) -> Option<ObjectKey> {
    meta.controller_owner()
        .filter(|owner| owner.kind == cronjob::KIND)
        .map(|owner| ObjectKey::new(&meta.namespace, &owner.name))
}

/// Reject a write whose resource version does not match the stored one.
/// Writes without a resource version are unconditional.
pub(crate) fn check_resource_version(
    key: &ObjectKey,
    submitted: Option<u64>,
    stored: Option<u64>,
) -> Result<(), StoreError> {
    match (submitted, stored) {
        (Some(expected), Some(actual)) if expected != actual => Err(StoreError::Conflict {
            key: key.to_string(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

/// Store trait for declarations and job instances.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    // CronJob operations

    /// Get a CronJob by key.
    async fn get_cronjob(&self, key: &ObjectKey) -> Result<CronJob, StoreError>;

    /// List CronJobs, optionally restricted to a namespace.
    async fn list_cronjobs(&self, namespace: Option<&str>) -> Result<Vec<CronJob>, StoreError>;

    /// Create a CronJob. Assigns uid, creation timestamp and resource version.
    async fn create_cronjob(&self, cronjob: CronJob) -> Result<CronJob, StoreError>;

    /// Replace a CronJob's spec and user metadata. Status is left alone.
    async fn update_cronjob(&self, cronjob: CronJob) -> Result<CronJob, StoreError>;

    /// Replace a CronJob's status only.
    async fn update_cronjob_status(&self, cronjob: &CronJob) -> Result<CronJob, StoreError>;

    /// Delete a CronJob, handling its jobs according to `propagation`.
    async fn delete_cronjob(
        &self,
        key: &ObjectKey,
        propagation: DeletePropagation,
    ) -> Result<(), StoreError>;

    // Job operations

    /// Get a Job by key.
    async fn get_job(&self, key: &ObjectKey) -> Result<Job, StoreError>;

    /// List Jobs controlled by the named CronJob.
    async fn list_owned_jobs(
        &self,
        namespace: &str,
        owner_name: &str,
    ) -> Result<Vec<Job>, StoreError>;

    /// List every Job in a namespace.
    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, StoreError>;

    /// Create a Job. Assigns uid, creation timestamp and resource version.
    async fn create_job(&self, job: Job) -> Result<Job, StoreError>;

    /// Replace a Job's status only.
    async fn update_job_status(&self, job: &Job) -> Result<Job, StoreError>;

    /// Delete a Job.
    async fn delete_job(
        &self,
        key: &ObjectKey,
        propagation: DeletePropagation,
    ) -> Result<(), StoreError>;

    // Watch

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Create a CronJob, or update its spec if it already exists.
pub async fn apply_cronjob<S: ObjectStore + ?Sized>(
    store: &S,
    mut cronjob: CronJob,
) -> Result<CronJob, StoreError> {
    match store.get_cronjob(&cronjob.key()).await {
        Ok(existing) => {
            cronjob.metadata.resource_version = existing.metadata.resource_version;
            store.update_cronjob(cronjob).await
        }
        Err(e) if e.is_not_found() => {
            cronjob.metadata.uid = None;
            cronjob.metadata.resource_version = None;
            store.create_cronjob(cronjob).await
        }
        Err(e) => Err(e),
    }
}
