//! SQLite store implementation.
//!
//! Provides persistent storage using SQLite. Objects are stored as JSON
//! bodies; key, owner and resource-version columns are kept alongside for
//! lookups and optimistic concurrency.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use super::{
    DeletePropagation, ObjectStore, StoreError, WATCH_CHANNEL_CAPACITY, WatchEvent,
    check_resource_version, owner_key,
};
use crate::core::clock::{Clock, SystemClock};
use crate::core::cronjob::{self, CronJob};
use crate::core::job::Job;
use crate::core::types::{ObjectKey, Uid};

/// SQLite store backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStore {
    pool: SqlitePool,
    resource_version: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(db_error)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        Self::from_pool(pool).await
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_error)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        let store = Self {
            pool,
            resource_version: AtomicU64::new(0),
            events,
            clock: Arc::new(SystemClock),
        };
        store.run_migrations().await?;

        let (latest,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(rv), 0) FROM (
                SELECT resource_version AS rv FROM cronjobs
                UNION ALL
                SELECT resource_version AS rv FROM jobs
            )",
        )
        .fetch_one(&store.pool)
        .await
        .map_err(db_error)?;
        store
            .resource_version
            .store(u64::try_from(latest).unwrap_or(0), Ordering::SeqCst);

        Ok(store)
    }

    /// Stamp creation timestamps with the given clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn next_resource_version(&self) -> u64 {
        self.resource_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, events: impl IntoIterator<Item = WatchEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }

    async fn fetch_cronjob(&self, key: &ObjectKey) -> Result<Option<CronJob>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM cronjobs WHERE namespace = ? AND name = ?")
                .bind(&key.namespace)
                .bind(&key.name)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        row.map(|(body,)| serde_json::from_str(&body).map_err(StoreError::from))
            .transpose()
    }

    async fn fetch_job(&self, key: &ObjectKey) -> Result<Option<Job>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM jobs WHERE namespace = ? AND name = ?")
                .bind(&key.namespace)
                .bind(&key.name)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        row.map(|(body,)| serde_json::from_str(&body).map_err(StoreError::from))
            .transpose()
    }

    /// Overwrite a row only if its resource version is still `expected`.
    async fn guarded_write(
        &self,
        table: &'static str,
        key: &ObjectKey,
        expected: u64,
        updated: u64,
        body: String,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET resource_version = ?, body = ? \
             WHERE namespace = ? AND name = ? AND resource_version = ?",
            table
        );
        let result = sqlx::query(&sql)
            .bind(to_db_version(updated)?)
            .bind(body)
            .bind(&key.namespace)
            .bind(&key.name)
            .bind(to_db_version(expected)?)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            // Lost a race with another writer between read and write.
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                actual: self.resource_version.load(Ordering::SeqCst),
            });
        }
        Ok(())
    }
}

fn db_error(err: sqlx::Error) -> StoreError {
    StoreError::Other(err.to_string())
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::Other(format!("resource version out of range: {}", version)))
}

fn decode_all<T: serde::de::DeserializeOwned>(rows: Vec<(String,)>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|(body,)| serde_json::from_str(&body).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn get_cronjob(&self, key: &ObjectKey) -> Result<CronJob, StoreError> {
        self.fetch_cronjob(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("cronjob: {}", key)))
    }

    async fn list_cronjobs(&self, namespace: Option<&str>) -> Result<Vec<CronJob>, StoreError> {
        let rows: Vec<(String,)> = match namespace {
            Some(ns) => {
                sqlx::query_as("SELECT body FROM cronjobs WHERE namespace = ? ORDER BY name")
                    .bind(ns)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query_as("SELECT body FROM cronjobs ORDER BY namespace, name")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_error)?;
        decode_all(rows)
    }

    async fn create_cronjob(&self, mut cronjob: CronJob) -> Result<CronJob, StoreError> {
        let key = cronjob.key();
        let uid = Uid::new();
        let resource_version = self.next_resource_version();
        cronjob.metadata.uid = Some(uid);
        cronjob.metadata.creation_timestamp = Some(self.clock.now());
        cronjob.metadata.resource_version = Some(resource_version);

        let result = sqlx::query(
            r#"
            INSERT INTO cronjobs (namespace, name, uid, resource_version, body)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(uid.to_string())
        .bind(to_db_version(resource_version)?)
        .bind(serde_json::to_string(&cronjob)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                self.notify([WatchEvent::CronJobChanged(key)]);
                Ok(cronjob)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyExists(format!("cronjob: {}", key)))
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn update_cronjob(&self, cronjob: CronJob) -> Result<CronJob, StoreError> {
        let key = cronjob.key();
        let existing = self.get_cronjob(&key).await?;
        check_resource_version(
            &key,
            cronjob.metadata.resource_version,
            existing.metadata.resource_version,
        )?;

        if existing.spec == cronjob.spec
            && existing.metadata.labels == cronjob.metadata.labels
            && existing.metadata.annotations == cronjob.metadata.annotations
        {
            return Ok(existing);
        }

        let expected = existing.metadata.resource_version.unwrap_or_default();
        let resource_version = self.next_resource_version();
        let mut updated = existing;
        updated.spec = cronjob.spec;
        updated.metadata.labels = cronjob.metadata.labels;
        updated.metadata.annotations = cronjob.metadata.annotations;
        updated.metadata.resource_version = Some(resource_version);

        self.guarded_write(
            "cronjobs",
            &key,
            expected,
            resource_version,
            serde_json::to_string(&updated)?,
        )
        .await?;
        self.notify([WatchEvent::CronJobChanged(key)]);
        Ok(updated)
    }

    async fn update_cronjob_status(&self, cronjob: &CronJob) -> Result<CronJob, StoreError> {
        let key = cronjob.key();
        let existing = self.get_cronjob(&key).await?;
        check_resource_version(
            &key,
            cronjob.metadata.resource_version,
            existing.metadata.resource_version,
        )?;

        if existing.status == cronjob.status {
            return Ok(existing);
        }

        let expected = existing.metadata.resource_version.unwrap_or_default();
        let resource_version = self.next_resource_version();
        let mut updated = existing;
        updated.status = cronjob.status.clone();
        updated.metadata.resource_version = Some(resource_version);

        self.guarded_write(
            "cronjobs",
            &key,
            expected,
            resource_version,
            serde_json::to_string(&updated)?,
        )
        .await?;
        self.notify([WatchEvent::CronJobChanged(key)]);
        Ok(updated)
    }

    async fn delete_cronjob(
        &self,
        key: &ObjectKey,
        propagation: DeletePropagation,
    ) -> Result<(), StoreError> {
        let existing = self.get_cronjob(key).await?;
        let owner_uid = existing
            .metadata
            .uid
            .map(|u| u.to_string())
            .unwrap_or_default();

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let children: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM jobs WHERE namespace = ? AND owner_name = ? AND owner_uid = ?",
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(&owner_uid)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;
        let children: Vec<Job> = decode_all(children)?;

        let mut events = Vec::with_capacity(children.len() + 1);
        for mut child in children {
            let child_key = child.key();
            match propagation {
                DeletePropagation::Background | DeletePropagation::Foreground => {
                    sqlx::query("DELETE FROM jobs WHERE namespace = ? AND name = ?")
                        .bind(&child_key.namespace)
                        .bind(&child_key.name)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_error)?;
                    events.push(WatchEvent::JobDeleted {
                        key: child_key,
                        owner: Some(key.clone()),
                    });
                }
                DeletePropagation::Orphan => {
                    let resource_version = self.next_resource_version();
                    child.metadata.owner_references.retain(|o| {
                        !(o.controller && o.kind == cronjob::KIND && o.name == key.name)
                    });
                    child.metadata.resource_version = Some(resource_version);
                    sqlx::query(
                        "UPDATE jobs SET owner_name = NULL, owner_uid = NULL, \
                         resource_version = ?, body = ? WHERE namespace = ? AND name = ?",
                    )
                    .bind(to_db_version(resource_version)?)
                    .bind(serde_json::to_string(&child)?)
                    .bind(&child_key.namespace)
                    .bind(&child_key.name)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error)?;
                    events.push(WatchEvent::JobChanged {
                        key: child_key,
                        owner: None,
                    });
                }
            }
        }

        let result = sqlx::query("DELETE FROM cronjobs WHERE namespace = ? AND name = ?")
            .bind(&key.namespace)
            .bind(&key.name)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("cronjob: {}", key)));
        }

        tx.commit().await.map_err(db_error)?;

        events.push(WatchEvent::CronJobDeleted(key.clone()));
        self.notify(events);
        Ok(())
    }

    async fn get_job(&self, key: &ObjectKey) -> Result<Job, StoreError> {
        self.fetch_job(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job: {}", key)))
    }

    async fn list_owned_jobs(
        &self,
        namespace: &str,
        owner_name: &str,
    ) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM jobs WHERE namespace = ? AND owner_name = ? ORDER BY name",
        )
        .bind(namespace)
        .bind(owner_name)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        decode_all(rows)
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT body FROM jobs WHERE namespace = ? ORDER BY name")
                .bind(namespace)
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;
        decode_all(rows)
    }

    async fn create_job(&self, mut job: Job) -> Result<Job, StoreError> {
        let key = job.key();
        let uid = Uid::new();
        let resource_version = self.next_resource_version();
        job.metadata.uid = Some(uid);
        job.metadata.creation_timestamp = Some(self.clock.now());
        job.metadata.resource_version = Some(resource_version);

        let owner = owner_key(&job.metadata);
        let owner_uid = owner
            .as_ref()
            .and_then(|_| job.metadata.controller_owner())
            .map(|o| o.uid.to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (namespace, name, uid, owner_name, owner_uid, resource_version, body)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(uid.to_string())
        .bind(owner.as_ref().map(|o| o.name.clone()))
        .bind(owner_uid)
        .bind(to_db_version(resource_version)?)
        .bind(serde_json::to_string(&job)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                self.notify([WatchEvent::JobChanged { key, owner }]);
                Ok(job)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyExists(format!("job: {}", key)))
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn update_job_status(&self, job: &Job) -> Result<Job, StoreError> {
        let key = job.key();
        let existing = self.get_job(&key).await?;
        check_resource_version(
            &key,
            job.metadata.resource_version,
            existing.metadata.resource_version,
        )?;

        if existing.status == job.status {
            return Ok(existing);
        }

        let expected = existing.metadata.resource_version.unwrap_or_default();
        let resource_version = self.next_resource_version();
        let mut updated = existing;
        updated.status = job.status.clone();
        updated.metadata.resource_version = Some(resource_version);

        self.guarded_write(
            "jobs",
            &key,
            expected,
            resource_version,
            serde_json::to_string(&updated)?,
        )
        .await?;
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
        let existing = self.get_job(key).await?;
        let result = sqlx::query("DELETE FROM jobs WHERE namespace = ? AND name = ?")
            .bind(&key.namespace)
            .bind(&key.name)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("job: {}", key)));
        }

        self.notify([WatchEvent::JobDeleted {
            key: key.clone(),
            owner: owner_key(&existing.metadata),
        }]);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
